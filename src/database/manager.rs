use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use super::error::StoreError;
use super::memory::MemoryStore;
use super::postgres::PgStore;
use super::schema;
use super::store::Store;
use super::unit_of_work::UnitOfWork;
use crate::config::DatabaseConfig;

/// Shared handle to the configured storage backend.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn Store>,
    transaction_timeout: Duration,
}

impl Database {
    pub fn new(store: Arc<dyn Store>, transaction_timeout: Duration) -> Self {
        Self { store, transaction_timeout }
    }

    /// Opens the backend named by `config.url`: `memory://` or a Postgres URL.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        if config.url.is_empty() {
            return Err(StoreError::ConfigMissing("DATABASE_URL"));
        }

        let acquire_timeout = Duration::from_millis(config.acquire_timeout_ms);
        let store: Arc<dyn Store> = if config.url.starts_with("memory:") {
            Arc::new(MemoryStore::new(schema::table_defs(), acquire_timeout))
        } else {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(acquire_timeout)
                .connect(&config.url)
                .await?;
            Arc::new(PgStore::new(pool, config.statement_timeout_ms))
        };

        info!("Connected {} database backend", store.backend());
        Ok(Self::new(store, Duration::from_millis(config.transaction_timeout_ms)))
    }

    /// In-memory database with the inventory constraints registered.
    pub fn in_memory() -> Self {
        let store = MemoryStore::new(schema::table_defs(), Duration::from_secs(5));
        Self::new(Arc::new(store), Duration::from_secs(30))
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub async fn begin(&self) -> Result<UnitOfWork, StoreError> {
        Ok(UnitOfWork::new(self.store.begin().await?))
    }

    /// Runs `fut` under the whole-transaction deadline. On expiry the future is
    /// dropped, which drops any unit of work it owns and rolls it back.
    pub async fn bounded<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        match tokio::time::timeout(self.transaction_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Transaction exceeded {:?}; aborted", self.transaction_timeout);
                Err(StoreError::Timeout.into())
            }
        }
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.store.migrate().await?;
        info!("Schema applied on {} backend", self.store.backend());
        Ok(())
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }
}
