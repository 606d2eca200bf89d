/// Application context and dependency injection
use crate::{
    config::RegistrarConfig,
    db,
    error::{RegistrarError, RegistrarResult},
    ledger::{InMemoryLedger, LedgerGateway},
    registrar::Registrar,
    scheduler::RetryPolicy,
    store::OperationStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<RegistrarConfig>,
    pub journal_db: Option<SqlitePool>,
    pub registrar: Arc<Registrar>,
    pub started_at: Instant,
}

impl AppContext {
    /// Create a new application context from configuration
    ///
    /// Opens the operation journal, replays it, and re-schedules operations
    /// that were still pending when the previous run stopped.
    pub async fn new(config: RegistrarConfig) -> RegistrarResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let journal_db =
            db::create_pool(&config.storage.journal_db, db::DatabaseOptions::default()).await?;
        db::test_connection(&journal_db).await?;

        let store = Arc::new(OperationStore::open(journal_db.clone()).await?);
        let ledger: Arc<dyn LedgerGateway> = Arc::new(
            InMemoryLedger::new(Duration::from_millis(config.ledger.confirmation_delay_ms))
                .resume_after(store.max_ledger_position()),
        );

        let context = Self::with_components(config, Some(journal_db), store, ledger);
        context.registrar.recover();

        Ok(context)
    }

    /// Assemble a context from already-built components
    pub fn with_components(
        config: RegistrarConfig,
        journal_db: Option<SqlitePool>,
        store: Arc<OperationStore>,
        ledger: Arc<dyn LedgerGateway>,
    ) -> Self {
        let policy = RetryPolicy::from(&config.publication);
        let registrar = Registrar::new(store, ledger, policy)
            .with_max_wait(Duration::from_secs(config.publication.max_wait_secs));

        Self {
            config: Arc::new(config),
            journal_db,
            registrar: Arc::new(registrar),
            started_at: Instant::now(),
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &RegistrarConfig) -> RegistrarResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                RegistrarError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }

    /// How long finished scheduled operations stay queryable
    pub fn operation_retention(&self) -> Duration {
        Duration::from_secs(self.config.publication.operation_retention_secs)
    }
}
