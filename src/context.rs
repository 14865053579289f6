/// Application context and dependency injection
use crate::{
    config::ServerConfig,
    db,
    error::{DirError, DirResult},
    jobs::ReverificationScheduler,
    naming::Verifier,
    store::SqliteRecordStore,
    verification::{NameVerificationStore, VerificationController},
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub store: Arc<SqliteRecordStore>,
    pub tracking: NameVerificationStore,
    pub controller: VerificationController,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> DirResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        if config.verification.allow_insecure_well_known {
            tracing::warn!("Plain HTTP well-known key fetches are enabled; do not use in production");
        }

        let verifier = Verifier::from_config(&config.verification)
            .map_err(|e| DirError::Configuration(format!("Failed to build verifier: {}", e)))?;

        Ok(Self::with_verifier(config, db, verifier))
    }

    /// Wire services around an existing pool and verifier
    pub fn with_verifier(config: ServerConfig, db: SqlitePool, verifier: Verifier) -> Self {
        let store = Arc::new(SqliteRecordStore::new(db.clone()));
        let tracking = NameVerificationStore::new(db.clone());
        let controller =
            VerificationController::new(store.clone(), tracking.clone(), Arc::new(verifier));

        Self {
            config: Arc::new(config),
            db,
            store,
            tracking,
            controller,
        }
    }

    /// Build the reverification scheduler for this context
    pub fn reverification_scheduler(&self, shutdown: CancellationToken) -> ReverificationScheduler {
        ReverificationScheduler::new(
            self.controller.clone(),
            self.tracking.clone(),
            self.config.verification.clone(),
            shutdown,
        )
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> DirResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                DirError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
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
}
