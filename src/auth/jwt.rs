use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use super::claims::{Claims, TokenSubject};
use crate::config::{ConfigError, JwtConfig};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token issuer does not match")]
    InvalidIssuer,
    #[error("token audience does not match")]
    InvalidAudience,
    #[error("token has expired")]
    Expired,
    #[error("token subject is missing or not a user id")]
    InvalidSubject,
    #[error("token is malformed: {0}")]
    Malformed(String),
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
            ErrorKind::InvalidAudience => TokenError::InvalidAudience,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::MissingRequiredClaim(claim) if claim == "sub" => TokenError::InvalidSubject,
            _ => TokenError::Malformed(e.to_string()),
        }
    }
}

/// One year.
const MAX_TTL_MINUTES: i64 = 365 * 24 * 60;

/// Issues and validates HS256 session tokens. Holds no state beyond the
/// configured keys, so one instance serves every request.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: TimeDuration,
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Result<Self, ConfigError> {
        if cfg.secret.trim().is_empty() {
            return Err(ConfigError::MissingJwtSecret);
        }
        if !(1..=MAX_TTL_MINUTES).contains(&cfg.ttl_minutes) {
            return Err(ConfigError::InvalidTokenLifetime {
                got: cfg.ttl_minutes,
                max: MAX_TTL_MINUTES,
            });
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: TimeDuration::minutes(cfg.ttl_minutes),
        })
    }

    pub fn issue(&self, user_id: i32, email: &str, now: OffsetDateTime) -> Result<String, TokenError> {
        let exp = now
            .checked_add(self.ttl)
            .ok_or_else(|| TokenError::Signing("expiry out of range".into()))?;
        let claims = Claims {
            sub: user_id.to_string(),
            name: email.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(user_id, "jwt signed");
        Ok(token)
    }

    /// Checks signature, issuer and audience, then expiry against `now` with
    /// no leeway.
    pub fn validate(&self, token: &str, now: OffsetDateTime) -> Result<TokenSubject, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        // expiry is checked below against the caller's clock
        validation.validate_exp = false;

        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        let claims = data.claims;

        if now.unix_timestamp() > claims.exp as i64 {
            return Err(TokenError::Expired);
        }
        let user_id = claims
            .sub
            .parse::<i32>()
            .map_err(|_| TokenError::InvalidSubject)?;

        debug!(user_id, "jwt verified");
        Ok(TokenSubject {
            user_id,
            email: claims.name,
        })
    }
}
