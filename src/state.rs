use crate::accounts::{
    memory::InMemoryAccountStore,
    password::{Argon2Hasher, CredentialHasher},
    repo::{AccountStore, PgAccountStore},
    services::AccountService,
};
use crate::config::{AppConfig, StoreBackend};
use crate::db;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub accounts: AccountService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let hasher = Arc::new(Argon2Hasher::new(&config.hashing)?) as Arc<dyn CredentialHasher>;

        let store = match config.store {
            StoreBackend::Postgres => {
                let pool = db::connect(&config).await?;
                Arc::new(PgAccountStore::new(pool)) as Arc<dyn AccountStore>
            }
            StoreBackend::Memory => {
                tracing::warn!("using in-memory account store; data is lost on restart");
                Arc::new(InMemoryAccountStore::new()) as Arc<dyn AccountStore>
            }
        };

        Ok(Self::from_parts(AccountService::new(store, hasher), config))
    }

    pub fn from_parts(accounts: AccountService, config: Arc<AppConfig>) -> Self {
        Self { accounts, config }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::HashingConfig;

        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            store: StoreBackend::Memory,
            database_url: None,
            max_connections: 1,
            hashing: HashingConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        });
        let hasher = Arc::new(crate::accounts::password::cheap_hasher());
        let store = Arc::new(InMemoryAccountStore::new());
        Self::from_parts(AccountService::new(store, hasher), config)
    }
}
