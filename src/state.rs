use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{jwt::TokenService, password::CredentialManager};
use crate::config::AppConfig;
use crate::users::{
    memory::MemoryUserStore,
    repo::{PgUserStore, UserStore},
    services::AccountService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub accounts: Arc<AccountService>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => {
                let store = PgUserStore::connect(url).await?;
                store.migrate().await?;
                info!("using postgres user store");
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                Arc::new(MemoryUserStore::default())
            }
        };

        Self::from_parts(Arc::new(config), store)
    }

    /// Fails on bad token or hashing configuration so the process never starts
    /// serving with it.
    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn UserStore>) -> anyhow::Result<Self> {
        let credentials = CredentialManager::new(&config.password)?;
        let tokens = TokenService::new(&config.jwt)?;
        let accounts = Arc::new(AccountService::new(store, credentials, tokens));
        Ok(Self { config, accounts })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::from_parts(
            Arc::new(AppConfig::for_tests()),
            Arc::new(MemoryUserStore::default()),
        )
        .expect("test config is valid")
    }
}
