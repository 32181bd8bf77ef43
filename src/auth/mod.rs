//! Password hashing, session tokens and the bearer-token extractor.

pub mod claims;
pub mod extractors;
pub mod jwt;
pub mod password;
