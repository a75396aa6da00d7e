use std::sync::Arc;
use tracing::info;
#[cfg(not(feature = "database"))]
use tracing::warn;

use crate::config::{DatabaseConfig, OrchestratorConfig};
use crate::workflow::{FileSystemRunStore, RunStore};

#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use chrono::{DateTime, Utc};
#[cfg(feature = "database")]
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, SqlitePool};
#[cfg(feature = "database")]
use tracing::{debug, warn};

#[cfg(feature = "database")]
use crate::workflow::persistence::PersistedRun;
#[cfg(feature = "database")]
use crate::workflow::{
    CheckpointReason, ContinuationToken, PendingOperation, PersistenceConfig, PersistenceError,
    RunId, WorkflowRun,
};

/// Open the run store the configuration asks for
///
/// A `[database]` section selects SQLite when the `database` feature is compiled in;
/// otherwise runs live in the persistence directory.
pub async fn open_run_store(config: &OrchestratorConfig) -> anyhow::Result<Arc<dyn RunStore>> {
    if let Some(db_config) = &config.database {
        return open_database_store(db_config, config).await;
    }
    Ok(file_store(config))
}

fn file_store(config: &OrchestratorConfig) -> Arc<dyn RunStore> {
    let persistence = config.persistence_config();
    info!(
        directory = ?persistence.persistence_directory,
        "Using file system run store"
    );
    Arc::new(FileSystemRunStore::new(persistence))
}

#[cfg(feature = "database")]
async fn open_database_store(
    db_config: &DatabaseConfig,
    config: &OrchestratorConfig,
) -> anyhow::Result<Arc<dyn RunStore>> {
    info!(url = %db_config.url, "Using SQLite run store");
    let store = SqliteRunStore::connect(db_config, config.persistence_config()).await?;
    Ok(Arc::new(store))
}

// Stub implementation for when the database feature is not enabled
#[cfg(not(feature = "database"))]
async fn open_database_store(
    _db_config: &DatabaseConfig,
    config: &OrchestratorConfig,
) -> anyhow::Result<Arc<dyn RunStore>> {
    warn!("Database configured but the database feature is not enabled; using file persistence");
    Ok(file_store(config))
}

#[cfg(feature = "database")]
fn db_error(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Database(e.to_string())
}

#[cfg(feature = "database")]
/// SQLite-backed run store
///
/// Runs are kept as the same versioned JSON envelope the file store writes, with the
/// phase and timestamps broken out into columns for listing and cleanup.
pub struct SqliteRunStore {
    pool: SqlitePool,
    config: PersistenceConfig,
}

#[cfg(feature = "database")]
impl SqliteRunStore {
    /// Create the database if needed, connect, and optionally run migrations
    pub async fn connect(
        db_config: &DatabaseConfig,
        config: PersistenceConfig,
    ) -> Result<Self, PersistenceError> {
        if !sqlx::Sqlite::database_exists(&db_config.url)
            .await
            .map_err(db_error)?
        {
            info!(url = %db_config.url, "Creating database");
            sqlx::Sqlite::create_database(&db_config.url)
                .await
                .map_err(db_error)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(db_config.max_connections.max(1))
            .connect(&db_config.url)
            .await
            .map_err(db_error)?;

        if db_config.auto_migrate {
            info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| PersistenceError::Database(e.to_string()))?;
            info!("Database migrations completed");
        }

        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write(
        &self,
        run: &WorkflowRun,
        reason: CheckpointReason,
        archived: bool,
    ) -> Result<String, PersistenceError> {
        let persisted = PersistedRun::new(run, reason, &self.config);
        let checkpoint_id = persisted.checkpoint.checkpoint_id.clone();
        let body = serde_json::to_string(&persisted)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_runs (run_id, phase, archived, body, checkpoint_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(run_id) DO UPDATE SET
                phase = excluded.phase,
                archived = excluded.archived,
                body = excluded.body,
                checkpoint_id = excluded.checkpoint_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(run.run_id.as_str())
        .bind(run.phase.as_str())
        .bind(archived)
        .bind(body)
        .bind(&checkpoint_id)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(checkpoint_id)
    }

    fn decode(&self, body: &str) -> Result<WorkflowRun, PersistenceError> {
        let persisted: PersistedRun = serde_json::from_str(body)?;
        persisted.verify(self.config.enable_integrity_checks)
    }

    async fn list(&self, archived: bool) -> Result<Vec<WorkflowRun>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, body FROM workflow_runs
            WHERE archived = ?1
            ORDER BY created_at ASC
            "#,
        )
        .bind(archived)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let run_id: String = row.get("run_id");
            let body: String = row.get("body");
            match self.decode(&body) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(run_id = %run_id, error = %e, "Skipping unreadable run row"),
            }
        }
        Ok(runs)
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl RunStore for SqliteRunStore {
    async fn save(
        &self,
        run: &WorkflowRun,
        reason: CheckpointReason,
    ) -> Result<String, PersistenceError> {
        let checkpoint_id = self.write(run, reason, false).await?;
        debug!(
            run_id = %run.run_id,
            phase = %run.phase,
            checkpoint_id = %checkpoint_id,
            reason = ?reason,
            "Run saved"
        );
        Ok(checkpoint_id)
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, PersistenceError> {
        let row = sqlx::query("SELECT body FROM workflow_runs WHERE run_id = ?1")
            .bind(run_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                self.decode(&body).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        self.list(false).await
    }

    async fn list_archived(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        self.list(true).await
    }

    async fn archive(&self, run: &WorkflowRun) -> Result<(), PersistenceError> {
        self.write(run, CheckpointReason::Archived, true).await?;
        info!(run_id = %run.run_id, phase = %run.phase, "Run archived");
        Ok(())
    }

    async fn register_pending(&self, pending: &PendingOperation) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO pending_operations (token, run_id, requested_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(pending.token.as_str())
        .bind(pending.run_id.as_str())
        .bind(pending.requested_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn resolve_pending(
        &self,
        token: &ContinuationToken,
    ) -> Result<Option<PendingOperation>, PersistenceError> {
        let row = sqlx::query(
            "SELECT token, run_id, requested_at FROM pending_operations WHERE token = ?1",
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let requested_at: String = row.get("requested_at");
        let requested_at = DateTime::parse_from_rfc3339(&requested_at)
            .map_err(|e| PersistenceError::StateCorruption {
                reason: format!("bad requested_at for pending token: {}", e),
            })?
            .with_timezone(&Utc);

        Ok(Some(PendingOperation {
            token: ContinuationToken(row.get("token")),
            run_id: RunId(row.get("run_id")),
            requested_at,
        }))
    }

    async fn remove_pending(&self, token: &ContinuationToken) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM pending_operations WHERE token = ?1")
            .bind(token.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn cleanup_archive(&self, cutoff: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM workflow_runs
            WHERE archived = 1 AND updated_at < ?1
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let cleaned_count = deleted.rows_affected() as usize;
        if cleaned_count > 0 {
            info!(cleaned_count, cutoff = %cutoff, "Cleaned up expired archived runs");
        }
        Ok(cleaned_count)
    }
}
