use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{ContinuationToken, PendingOperation, RunId, WorkflowRun};

pub const PERSISTED_RUN_VERSION: &str = "1";

/// Errors that can occur during run persistence
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("State corruption detected: {reason}")]
    StateCorruption { reason: String },

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Database error: {0}")]
    Database(String),
}

/// On-disk envelope around a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRun {
    pub version: String,
    pub run: WorkflowRun,
    pub checkpoint: CheckpointMetadata,
    pub last_persisted: DateTime<Utc>,
}

impl PersistedRun {
    /// Wrap a run for storage, pruning its history to the configured limit
    pub fn new(run: &WorkflowRun, reason: CheckpointReason, config: &PersistenceConfig) -> Self {
        let mut run = run.clone();
        prune_transition_history(&mut run, config.max_transition_history_entries);

        let integrity_hash = if config.enable_integrity_checks {
            calculate_integrity_hash(&run)
        } else {
            "integrity_disabled".to_string()
        };

        Self {
            version: PERSISTED_RUN_VERSION.to_string(),
            run,
            checkpoint: CheckpointMetadata::new(reason, integrity_hash),
            last_persisted: Utc::now(),
        }
    }

    /// Check the envelope version and, when enabled, the integrity hash
    pub fn verify(self, integrity_checks: bool) -> Result<WorkflowRun, PersistenceError> {
        if self.version != PERSISTED_RUN_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: PERSISTED_RUN_VERSION.to_string(),
                found: self.version,
            });
        }

        if integrity_checks {
            let actual_hash = calculate_integrity_hash(&self.run);
            if self.checkpoint.integrity_hash != actual_hash {
                warn!(
                    run_id = %self.run.run_id,
                    expected_hash = %self.checkpoint.integrity_hash,
                    actual_hash = %actual_hash,
                    "Run integrity check failed"
                );
                return Err(PersistenceError::StateCorruption {
                    reason: format!("integrity check failed for run {}", self.run.run_id),
                });
            }
        }

        Ok(self.run)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub checkpoint_id: String,
    pub creation_reason: CheckpointReason,
    pub integrity_hash: String,
    pub process_id: Option<u32>,
    pub hostname: String,
}

impl CheckpointMetadata {
    fn new(reason: CheckpointReason, integrity_hash: String) -> Self {
        Self {
            checkpoint_id: new_checkpoint_id(),
            creation_reason: reason,
            integrity_hash,
            process_id: std::process::id().into(),
            hostname: hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointReason {
    RunCreated,
    StateTransition,
    Recovered,
    Archived,
}

/// Configuration for run persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub persistence_directory: PathBuf,
    pub max_transition_history_entries: usize,
    pub archive_retention_days: u32,
    pub enable_integrity_checks: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            persistence_directory: PathBuf::from(".etl-orchestrator/state"),
            max_transition_history_entries: 500,
            archive_retention_days: 30,
            enable_integrity_checks: true,
        }
    }
}

/// Durable storage for workflow runs and their pending manifest callbacks
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist the current state of an active run; returns the checkpoint id
    async fn save(
        &self,
        run: &WorkflowRun,
        reason: CheckpointReason,
    ) -> Result<String, PersistenceError>;

    /// Load a run, active or archived
    async fn load(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, PersistenceError>;

    async fn list_active(&self) -> Result<Vec<WorkflowRun>, PersistenceError>;

    async fn list_archived(&self) -> Result<Vec<WorkflowRun>, PersistenceError>;

    /// Move a terminal run out of the active set
    async fn archive(&self, run: &WorkflowRun) -> Result<(), PersistenceError>;

    async fn register_pending(&self, pending: &PendingOperation) -> Result<(), PersistenceError>;

    async fn resolve_pending(
        &self,
        token: &ContinuationToken,
    ) -> Result<Option<PendingOperation>, PersistenceError>;

    async fn remove_pending(&self, token: &ContinuationToken) -> Result<(), PersistenceError>;

    /// Drop archived runs last updated before `cutoff`; returns how many were removed
    async fn cleanup_archive(&self, cutoff: DateTime<Utc>) -> Result<usize, PersistenceError>;
}

pub(crate) fn new_checkpoint_id() -> String {
    format!("{}_{}", Utc::now().timestamp(), rand::rng().random::<u32>())
}

/// Hash of the fields that must not change between a save and the next load
///
/// The fields are laid out as a compact JSON array and hashed with BLAKE3, so the
/// value stays stable across toolchains and releases.
pub(crate) fn calculate_integrity_hash(run: &WorkflowRun) -> String {
    let material = serde_json::json!([
        run.run_id.as_str(),
        run.phase.as_str(),
        run.job_id.as_ref().map(|job_id| job_id.0.as_str()),
        run.continuation_token.as_ref().map(ContinuationToken::as_str),
        run.transitions.len(),
        run.created_at.timestamp(),
        run.deadline.timestamp(),
    ]);

    blake3::hash(material.to_string().as_bytes())
        .to_hex()
        .to_string()
}

pub(crate) fn prune_transition_history(run: &mut WorkflowRun, max_entries: usize) {
    if run.transitions.len() > max_entries {
        let excess = run.transitions.len() - max_entries;
        run.transitions.drain(0..excess);
        debug!(
            run_id = %run.run_id,
            pruned = excess,
            remaining = run.transitions.len(),
            "Pruned excess transition history entries"
        );
    }
}

/// Pending operations are keyed by a hash of the token so arbitrary token text
/// never ends up in a file name
fn token_key(token: &ContinuationToken) -> String {
    blake3::hash(token.as_str().as_bytes()).to_hex().to_string()
}

/// File system implementation of run persistence
///
/// Layout under the persistence directory:
/// `active/<run_id>.run.json`, `archive/<run_id>.run.json` and
/// `pending/<token hash>.pending.json`. Every write goes to a temporary file first
/// and is renamed into place.
pub struct FileSystemRunStore {
    config: PersistenceConfig,
}

impl FileSystemRunStore {
    pub fn new(config: PersistenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    fn active_dir(&self) -> PathBuf {
        self.config.persistence_directory.join("active")
    }

    fn archive_dir(&self) -> PathBuf {
        self.config.persistence_directory.join("archive")
    }

    fn pending_dir(&self) -> PathBuf {
        self.config.persistence_directory.join("pending")
    }

    fn run_file_name(run_id: &RunId) -> String {
        format!("{}.run.json", run_id)
    }

    fn pending_file_path(&self, token: &ContinuationToken) -> PathBuf {
        self.pending_dir()
            .join(format!("{}.pending.json", token_key(token)))
    }

    async fn ensure_directories(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(self.active_dir()).await?;
        fs::create_dir_all(self.archive_dir()).await?;
        fs::create_dir_all(self.pending_dir()).await?;
        Ok(())
    }

    /// Write to a temporary file first, then rename (atomic on the same file system)
    async fn write_atomic(path: &Path, contents: String) -> Result<(), PersistenceError> {
        let temp_file = format!("{}.tmp", path.display());
        fs::write(&temp_file, contents).await?;
        fs::rename(&temp_file, path).await?;
        Ok(())
    }

    async fn read_run(&self, path: &Path) -> Result<Option<WorkflowRun>, PersistenceError> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedRun = serde_json::from_str(&contents)?;
        persisted
            .verify(self.config.enable_integrity_checks)
            .map(Some)
            .map_err(|e| match e {
                PersistenceError::StateCorruption { .. } => PersistenceError::StateCorruption {
                    reason: format!("integrity check failed for {}", path.display()),
                },
                other => other,
            })
    }

    async fn read_dir_runs(&self, dir: PathBuf) -> Result<Vec<WorkflowRun>, PersistenceError> {
        let mut runs = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_run_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(".run.json"));
            if !is_run_file {
                continue;
            }

            // A single unreadable file must not hide every other run
            match self.read_run(&path).await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(e) => warn!(file = ?path, error = %e, "Skipping unreadable run file"),
            }
        }

        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }
}

#[async_trait]
impl RunStore for FileSystemRunStore {
    async fn save(
        &self,
        run: &WorkflowRun,
        reason: CheckpointReason,
    ) -> Result<String, PersistenceError> {
        self.ensure_directories().await?;

        let persisted = PersistedRun::new(run, reason, &self.config);
        let checkpoint_id = persisted.checkpoint.checkpoint_id.clone();
        let run_file = self.active_dir().join(Self::run_file_name(&run.run_id));

        Self::write_atomic(&run_file, serde_json::to_string_pretty(&persisted)?).await?;

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
        let file_name = Self::run_file_name(run_id);
        if let Some(run) = self.read_run(&self.active_dir().join(&file_name)).await? {
            return Ok(Some(run));
        }
        self.read_run(&self.archive_dir().join(&file_name)).await
    }

    async fn list_active(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        self.read_dir_runs(self.active_dir()).await
    }

    async fn list_archived(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        self.read_dir_runs(self.archive_dir()).await
    }

    async fn archive(&self, run: &WorkflowRun) -> Result<(), PersistenceError> {
        self.ensure_directories().await?;

        let file_name = Self::run_file_name(&run.run_id);
        let persisted = PersistedRun::new(run, CheckpointReason::Archived, &self.config);
        Self::write_atomic(
            &self.archive_dir().join(&file_name),
            serde_json::to_string_pretty(&persisted)?,
        )
        .await?;

        match fs::remove_file(self.active_dir().join(&file_name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            run_id = %run.run_id,
            phase = %run.phase,
            "Run archived"
        );
        Ok(())
    }

    async fn register_pending(&self, pending: &PendingOperation) -> Result<(), PersistenceError> {
        self.ensure_directories().await?;
        let path = self.pending_file_path(&pending.token);
        Self::write_atomic(&path, serde_json::to_string_pretty(pending)?).await?;
        debug!(run_id = %pending.run_id, token = %pending.token, "Pending operation registered");
        Ok(())
    }

    async fn resolve_pending(
        &self,
        token: &ContinuationToken,
    ) -> Result<Option<PendingOperation>, PersistenceError> {
        let contents = match fs::read_to_string(self.pending_file_path(token)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pending: PendingOperation = serde_json::from_str(&contents)?;

        // Hash collisions resolve to nothing rather than to the wrong run
        if pending.token != *token {
            return Ok(None);
        }
        Ok(Some(pending))
    }

    async fn remove_pending(&self, token: &ContinuationToken) -> Result<(), PersistenceError> {
        match fs::remove_file(self.pending_file_path(token)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn cleanup_archive(&self, cutoff: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let mut cleaned_count = 0;
        let mut entries = match fs::read_dir(self.archive_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let run = match self.read_run(&path).await {
                Ok(Some(run)) => run,
                Ok(None) => continue,
                Err(e) => {
                    warn!(file = ?path, error = %e, "Skipping unreadable archive file");
                    continue;
                }
            };

            if run.updated_at < cutoff {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(file = ?path, error = %e, "Failed to remove expired archive file");
                } else {
                    cleaned_count += 1;
                    debug!(run_id = %run.run_id, "Removed expired archived run");
                }
            }
        }

        if cleaned_count > 0 {
            info!(
                cleaned_count,
                cutoff = %cutoff,
                "Cleaned up expired archived runs"
            );
        }

        Ok(cleaned_count)
    }
}

/// Process-local store for tests and ephemeral deployments
#[derive(Default)]
pub struct InMemoryRunStore {
    active: RwLock<HashMap<RunId, WorkflowRun>>,
    archived: RwLock<HashMap<RunId, WorkflowRun>>,
    pending: RwLock<HashMap<ContinuationToken, PendingOperation>>,
    max_transition_history_entries: Option<usize>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(max_entries: usize) -> Self {
        Self {
            max_transition_history_entries: Some(max_entries),
            ..Self::default()
        }
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(
        &self,
        run: &WorkflowRun,
        _reason: CheckpointReason,
    ) -> Result<String, PersistenceError> {
        let mut run = run.clone();
        if let Some(max_entries) = self.max_transition_history_entries {
            prune_transition_history(&mut run, max_entries);
        }
        self.active.write().await.insert(run.run_id.clone(), run);
        Ok(new_checkpoint_id())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<WorkflowRun>, PersistenceError> {
        if let Some(run) = self.active.read().await.get(run_id) {
            return Ok(Some(run.clone()));
        }
        Ok(self.archived.read().await.get(run_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        let mut runs: Vec<WorkflowRun> = self.active.read().await.values().cloned().collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn list_archived(&self) -> Result<Vec<WorkflowRun>, PersistenceError> {
        let mut runs: Vec<WorkflowRun> = self.archived.read().await.values().cloned().collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn archive(&self, run: &WorkflowRun) -> Result<(), PersistenceError> {
        self.active.write().await.remove(&run.run_id);
        self.archived
            .write()
            .await
            .insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn register_pending(&self, pending: &PendingOperation) -> Result<(), PersistenceError> {
        self.pending
            .write()
            .await
            .insert(pending.token.clone(), pending.clone());
        Ok(())
    }

    async fn resolve_pending(
        &self,
        token: &ContinuationToken,
    ) -> Result<Option<PendingOperation>, PersistenceError> {
        Ok(self.pending.read().await.get(token).cloned())
    }

    async fn remove_pending(&self, token: &ContinuationToken) -> Result<(), PersistenceError> {
        self.pending.write().await.remove(token);
        Ok(())
    }

    async fn cleanup_archive(&self, cutoff: DateTime<Utc>) -> Result<usize, PersistenceError> {
        let mut archived = self.archived.write().await;
        let before = archived.len();
        archived.retain(|_, run| run.updated_at >= cutoff);
        Ok(before - archived.len())
    }
}
