use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Configuration problems that must stop the process before it serves traffic.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JWT_SECRET is not set or is empty")]
    MissingJwtSecret,
    #[error("invalid password hashing parameters: {0}")]
    InvalidPasswordParams(String),
    #[error("JWT_TTL_MINUTES must be between 1 and {max}, got {got}")]
    InvalidTokenLifetime { got: i64, max: i64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs the service against the in-memory store.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Unset or unparsable
    /// numeric values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt = JwtConfig {
            secret: lookup("JWT_SECRET").unwrap_or_default(),
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "progressApp".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "progressApp".into()),
            ttl_minutes: parsed(&lookup, "JWT_TTL_MINUTES").unwrap_or(60),
        };
        let password = PasswordConfig {
            memory_kib: parsed(&lookup, "PASSWORD_HASH_MEMORY_KIB").unwrap_or(19 * 1024),
            iterations: parsed(&lookup, "PASSWORD_HASH_ITERATIONS").unwrap_or(2),
            parallelism: parsed(&lookup, "PASSWORD_HASH_PARALLELISM").unwrap_or(1),
        };

        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            jwt,
            password,
            host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "APP_PORT").unwrap_or(5000),
            request_timeout_secs: parsed(&lookup, "REQUEST_TIMEOUT_SECS").unwrap_or(30),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database_url: None,
            jwt: JwtConfig {
                secret: "test-secret-0123456789abcdef".into(),
                issuer: "progressApp".into(),
                audience: "progressApp".into(),
                ttl_minutes: 60,
            },
            // cheap parameters keep the test suite fast
            password: PasswordConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            host: "127.0.0.1".into(),
            port: 0,
            request_timeout_secs: 5,
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.jwt.secret, "");
        assert_eq!(cfg.jwt.issuer, "progressApp");
        assert_eq!(cfg.jwt.audience, "progressApp");
        assert_eq!(cfg.jwt.ttl_minutes, 60);
        assert_eq!(cfg.password.memory_kib, 19 * 1024);
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.request_timeout_secs, 30);
    }

    #[test]
    fn reads_values_and_ignores_garbage_numbers() {
        let cfg = config_from(&[
            ("DATABASE_URL", "postgres://u:p@db/accounts"),
            ("JWT_SECRET", "s3cret"),
            ("JWT_TTL_MINUTES", "15"),
            ("APP_PORT", "not-a-port"),
            ("PASSWORD_HASH_ITERATIONS", " 4 "),
            ("PASSWORD_HASH_MEMORY_KIB", "4096"),
            ("REQUEST_TIMEOUT_SECS", "7"),
        ]);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@db/accounts"));
        assert_eq!(cfg.jwt.secret, "s3cret");
        assert_eq!(cfg.jwt.ttl_minutes, 15);
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.password.iterations, 4);
        assert_eq!(cfg.password.memory_kib, 4096);
        assert_eq!(cfg.request_timeout_secs, 7);
    }

    #[test]
    fn blank_database_url_means_memory_store() {
        let cfg = config_from(&[("DATABASE_URL", "  ")]);
        assert!(cfg.database_url.is_none());
    }
}
