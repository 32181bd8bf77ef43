use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::error;

use crate::config::{ConfigError, PasswordConfig};

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("stored password hash is malformed")]
    MalformedHash,
}

/// Argon2id hashing with a fresh random salt per call.
#[derive(Clone)]
pub struct CredentialManager {
    argon2: Argon2<'static>,
}

impl CredentialManager {
    pub fn new(cfg: &PasswordConfig) -> Result<Self, ConfigError> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| ConfigError::InvalidPasswordParams(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, plain: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                PasswordError::Hash(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Cost parameters are read back from `hash`, so hashes produced under an
    /// older configuration still verify.
    pub fn verify(&self, plain: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            PasswordError::MalformedHash
        })?;
        match self.argon2.verify_password(plain.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => {
                error!(error = %e, "argon2 verify_password error");
                Err(PasswordError::MalformedHash)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn manager() -> CredentialManager {
        CredentialManager::new(&AppConfig::for_tests().password).expect("valid params")
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let creds = manager();
        let password = "Secur3P@ssw0rd!";
        let hash = creds.hash(password).expect("hashing should succeed");
        assert_ne!(hash, password);
        assert!(hash.starts_with("$argon2id$"));
        assert!(creds.verify(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let creds = manager();
        let hash = creds.hash("correct-horse-battery-staple").expect("hashing should succeed");
        assert!(!creds.verify("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn same_input_hashes_differently() {
        let creds = manager();
        let a = creds.hash("pw123").unwrap();
        let b = creds.hash("pw123").unwrap();
        assert_ne!(a, b);
        assert!(creds.verify("pw123", &a).unwrap());
        assert!(creds.verify("pw123", &b).unwrap());
    }

    #[test]
    fn verify_reports_malformed_hash() {
        let err = manager().verify("anything", "not-a-valid-hash").unwrap_err();
        assert!(matches!(err, PasswordError::MalformedHash));
    }

    #[test]
    fn hashes_from_other_cost_settings_still_verify() {
        let weak = manager();
        let stronger = CredentialManager::new(&PasswordConfig {
            memory_kib: 2048,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        let hash = weak.hash("pw").unwrap();
        assert!(stronger.verify("pw", &hash).unwrap());
    }

    #[test]
    fn rejects_impossible_params() {
        let res = CredentialManager::new(&PasswordConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        });
        assert!(matches!(res, Err(ConfigError::InvalidPasswordParams(_))));
    }
}
