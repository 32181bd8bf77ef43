use std::sync::Arc;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use super::{
    repo::{StoreError, UserStore},
    repo_types::{NewUser, User, UserPatch},
};
use crate::auth::{
    claims::TokenSubject,
    jwt::TokenService,
    password::{CredentialManager, PasswordError},
};

/// Caller-visible outcome of an account operation.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("User not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AccountError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => AccountError::DuplicateEmail,
            StoreError::Database(e) => AccountError::Internal(anyhow::Error::new(e).context("user store")),
        }
    }
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validated_email(email: &str) -> Result<String, AccountError> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(AccountError::Validation("Invalid email".into()));
    }
    Ok(email)
}

fn validated_name(name: &str) -> Result<String, AccountError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AccountError::Validation("Name is required".into()));
    }
    Ok(name.to_string())
}

/// Registration, login and the "current user" operations. Shared across
/// requests behind an `Arc`; holds no per-request state.
pub struct AccountService {
    store: Arc<dyn UserStore>,
    credentials: CredentialManager,
    tokens: TokenService,
}

impl AccountService {
    pub fn new(store: Arc<dyn UserStore>, credentials: CredentialManager, tokens: TokenService) -> Self {
        Self {
            store,
            credentials,
            tokens,
        }
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, AccountError> {
        let name = validated_name(name)?;
        let email = validated_email(email)?;
        if password.is_empty() {
            return Err(AccountError::Validation("Password is required".into()));
        }

        // The store enforces uniqueness too; this just avoids hashing for nothing.
        if self.store.find_by_email(&email).await?.is_some() {
            warn!(email = %email, "email already registered");
            return Err(AccountError::DuplicateEmail);
        }

        let password_hash = self.hash_password(password.to_string()).await?;
        let user = self
            .store
            .create(NewUser {
                name,
                email,
                password_hash,
            })
            .await?;

        info!(user_id = user.id, email = %user.email, "user registered");
        Ok(user)
    }

    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, User), AccountError> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(AccountError::Validation("Email and password are required".into()));
        }

        let Some(user) = self.store.find_by_email(&email).await? else {
            warn!(email = %email, "login unknown email");
            return Err(AccountError::InvalidCredentials);
        };

        if !self.verify_password(password.to_string(), user.password_hash.clone()).await? {
            warn!(user_id = user.id, "login invalid password");
            return Err(AccountError::InvalidCredentials);
        }

        let token = self
            .tokens
            .issue(user.id, &user.email, OffsetDateTime::now_utc())
            .context("issue session token")?;

        info!(user_id = user.id, "user logged in");
        Ok((token, user))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AccountError> {
        Ok(self.store.list().await?)
    }

    pub async fn get_self(&self, token: &str) -> Result<User, AccountError> {
        let subject = self.authenticate(token)?;
        self.find_subject(&subject).await
    }

    pub async fn update_self(&self, token: &str, patch: UserPatch) -> Result<User, AccountError> {
        let subject = self.authenticate(token)?;
        let mut user = self.find_subject(&subject).await?;

        if let Some(name) = patch.name {
            user.name = validated_name(&name)?;
        }
        if let Some(email) = patch.email {
            user.email = validated_email(&email)?;
        }
        if let Some(password) = patch.password.filter(|p| !p.is_empty()) {
            user.password_hash = self.hash_password(password).await?;
        }

        let user = self.store.update(&user).await?.ok_or(AccountError::NotFound)?;
        info!(user_id = user.id, "user updated");
        Ok(user)
    }

    /// Outstanding tokens for the deleted user stay valid until they expire;
    /// they resolve to `NotFound` from then on.
    pub async fn delete_self(&self, token: &str) -> Result<(), AccountError> {
        let subject = self.authenticate(token)?;
        if !self.store.delete(subject.user_id).await? {
            warn!(user_id = subject.user_id, "delete of missing user");
            return Err(AccountError::NotFound);
        }
        info!(user_id = subject.user_id, "user deleted");
        Ok(())
    }

    fn authenticate(&self, token: &str) -> Result<TokenSubject, AccountError> {
        let subject = self
            .tokens
            .validate(token, OffsetDateTime::now_utc())
            .map_err(|e| {
                warn!(reason = %e, "token rejected");
                AccountError::Unauthorized
            })?;
        debug!(user_id = subject.user_id, email = %subject.email, "token accepted");
        Ok(subject)
    }

    async fn find_subject(&self, subject: &TokenSubject) -> Result<User, AccountError> {
        self.store
            .find_by_id(subject.user_id)
            .await?
            .ok_or_else(|| {
                debug!(user_id = subject.user_id, "token subject no longer exists");
                AccountError::NotFound
            })
    }

    // Argon2 is deliberately slow; keep it off the async workers.
    async fn hash_password(&self, plain: String) -> Result<String, AccountError> {
        let credentials = self.credentials.clone();
        let hash = tokio::task::spawn_blocking(move || credentials.hash(&plain))
            .await
            .context("password hashing task")?
            .context("hash password")?;
        Ok(hash)
    }

    async fn verify_password(&self, plain: String, hash: String) -> Result<bool, AccountError> {
        let credentials = self.credentials.clone();
        let res = tokio::task::spawn_blocking(move || credentials.verify(&plain, &hash))
            .await
            .context("password verification task")?;
        match res {
            Ok(ok) => Ok(ok),
            Err(PasswordError::MalformedHash) => {
                error!("stored password hash is malformed; treating as mismatch");
                Ok(false)
            }
            Err(e) => Err(AccountError::Internal(e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, users::memory::MemoryUserStore};
    use time::Duration as TimeDuration;

    fn service_with_store() -> (AccountService, Arc<MemoryUserStore>) {
        let cfg = AppConfig::for_tests();
        let store = Arc::new(MemoryUserStore::default());
        let svc = AccountService::new(
            store.clone(),
            CredentialManager::new(&cfg.password).unwrap(),
            TokenService::new(&cfg.jwt).unwrap(),
        );
        (svc, store)
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a x@y.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn register_stores_hash_not_plaintext() {
        let (svc, store) = service_with_store();
        let user = svc.register("A", "a@x.com", "pw123").await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, user.id);
        assert_ne!(all[0].password_hash, "pw123");
        assert!(all[0].password_hash.starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn register_normalises_email_and_rejects_duplicates() {
        let (svc, _) = service_with_store();
        let user = svc.register("A", "  A@X.com ", "pw123").await.unwrap();
        assert_eq!(user.email, "a@x.com");

        let err = svc.register("B", "a@x.com", "other").await.unwrap_err();
        assert!(matches!(err, AccountError::DuplicateEmail));
    }

    #[tokio::test]
    async fn register_validates_input() {
        let (svc, _) = service_with_store();
        for (name, email, password) in [("", "a@x.com", "pw"), ("A", "nope", "pw"), ("A", "a@x.com", "")] {
            let err = svc.register(name, email, password).await.unwrap_err();
            assert!(matches!(err, AccountError::Validation(_)), "{name:?} {email:?}");
        }
    }

    #[tokio::test]
    async fn login_issues_token_for_the_user() {
        let (svc, _) = service_with_store();
        let user = svc.register("A", "a@x.com", "pw123").await.unwrap();

        let (token, logged_in) = svc.login("a@x.com", "pw123").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let subject = svc.tokens.validate(&token, OffsetDateTime::now_utc()).unwrap();
        assert_eq!(subject.user_id, user.id);
        assert_eq!(subject.email, "a@x.com");
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (svc, _) = service_with_store();
        svc.register("A", "a@x.com", "pw123").await.unwrap();

        let wrong_password = svc.login("a@x.com", "wrong").await.unwrap_err();
        let unknown_email = svc.login("nobody@x.com", "pw123").await.unwrap_err();
        assert!(matches!(wrong_password, AccountError::InvalidCredentials));
        assert!(matches!(unknown_email, AccountError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn login_with_corrupt_hash_is_invalid_credentials() {
        let (svc, store) = service_with_store();
        store
            .create(NewUser {
                name: "A".into(),
                email: "a@x.com".into(),
                password_hash: "plaintext-by-mistake".into(),
            })
            .await
            .unwrap();
        let err = svc.login("a@x.com", "plaintext-by-mistake").await.unwrap_err();
        assert!(matches!(err, AccountError::InvalidCredentials));
    }

    #[tokio::test]
    async fn update_name_only_keeps_email_and_hash() {
        let (svc, store) = service_with_store();
        svc.register("A", "a@x.com", "pw123").await.unwrap();
        let (token, before) = svc.login("a@x.com", "pw123").await.unwrap();

        let patch = UserPatch {
            name: Some("Alice".into()),
            ..Default::default()
        };
        let after = svc.update_self(&token, patch).await.unwrap();
        assert_eq!(after.name, "Alice");
        assert_eq!(after.email, before.email);
        assert_eq!(after.password_hash, before.password_hash);
        assert_eq!(store.find_by_id(before.id).await.unwrap(), Some(after));
    }

    #[tokio::test]
    async fn update_password_rehashes_and_allows_new_login() {
        let (svc, _) = service_with_store();
        svc.register("A", "a@x.com", "pw123").await.unwrap();
        let (token, _) = svc.login("a@x.com", "pw123").await.unwrap();

        let patch = UserPatch {
            password: Some("new-pw".into()),
            ..Default::default()
        };
        svc.update_self(&token, patch).await.unwrap();

        assert!(matches!(
            svc.login("a@x.com", "pw123").await.unwrap_err(),
            AccountError::InvalidCredentials
        ));
        assert!(svc.login("a@x.com", "new-pw").await.is_ok());
    }

    #[tokio::test]
    async fn update_to_taken_email_is_duplicate() {
        let (svc, _) = service_with_store();
        svc.register("A", "a@x.com", "pw123").await.unwrap();
        svc.register("B", "b@x.com", "pw123").await.unwrap();
        let (token, _) = svc.login("b@x.com", "pw123").await.unwrap();

        let patch = UserPatch {
            email: Some("a@x.com".into()),
            ..Default::default()
        };
        assert!(matches!(
            svc.update_self(&token, patch).await.unwrap_err(),
            AccountError::DuplicateEmail
        ));
    }

    #[tokio::test]
    async fn delete_then_get_with_same_token_is_not_found() {
        let (svc, _) = service_with_store();
        svc.register("A", "a@x.com", "pw123").await.unwrap();
        let (token, user) = svc.login("a@x.com", "pw123").await.unwrap();

        assert_eq!(svc.get_self(&token).await.unwrap().id, user.id);
        svc.delete_self(&token).await.unwrap();

        assert!(matches!(svc.get_self(&token).await.unwrap_err(), AccountError::NotFound));
        assert!(matches!(svc.delete_self(&token).await.unwrap_err(), AccountError::NotFound));
    }

    #[tokio::test]
    async fn bad_or_expired_tokens_are_unauthorized() {
        let (svc, _) = service_with_store();
        let user = svc.register("A", "a@x.com", "pw123").await.unwrap();

        assert!(matches!(
            svc.get_self("garbage").await.unwrap_err(),
            AccountError::Unauthorized
        ));

        let stale = svc
            .tokens
            .issue(user.id, &user.email, OffsetDateTime::now_utc() - TimeDuration::hours(2))
            .unwrap();
        assert!(matches!(
            svc.get_self(&stale).await.unwrap_err(),
            AccountError::Unauthorized
        ));
    }
}
