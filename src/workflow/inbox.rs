use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::WorkflowError;
use super::orchestrator::WorkflowOrchestrator;
use super::types::{ContinuationToken, ManifestRef, RunId, SourceSpec};
use crate::shutdown::wait_for_shutdown;

/// Orders messages delivered within the same clock tick
static DELIVERY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed inbox message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Out-of-band request delivered to a serving orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboxMessage {
    /// Manifest-ready callback; `run_id` is optional since the token identifies the run
    ManifestReady {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<RunId>,
        token: ContinuationToken,
        manifest: ManifestRef,
    },
    Cancel {
        run_id: RunId,
    },
    Start {
        source: SourceSpec,
    },
}

impl InboxMessage {
    fn kind(&self) -> &'static str {
        match self {
            InboxMessage::ManifestReady { .. } => "manifest-ready",
            InboxMessage::Cancel { .. } => "cancel",
            InboxMessage::Start { .. } => "start",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub rejected: usize,
}

/// Durable directory of JSON messages, processed in delivery order
///
/// Writers drop `<timestamp>-<sequence>-<uuid>.json` files (written to a temp name and renamed);
/// the serving process drains them. Messages that cannot be parsed or are refused by
/// the orchestrator move to `rejected/` next to a `.error` file explaining why.
#[derive(Debug, Clone)]
pub struct CallbackInbox {
    directory: PathBuf,
}

impl CallbackInbox {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn rejected_dir(&self) -> PathBuf {
        self.directory.join("rejected")
    }

    pub async fn deliver(&self, message: &InboxMessage) -> Result<PathBuf, InboxError> {
        fs::create_dir_all(&self.directory).await?;

        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let sequence = DELIVERY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let name = format!("{:020}-{:010}-{}.json", nanos, sequence, Uuid::new_v4());
        let path = self.directory.join(&name);
        let temp_path = self.directory.join(format!("{}.tmp", name));

        fs::write(&temp_path, serde_json::to_string_pretty(message)?).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(kind = message.kind(), file = ?path, "Inbox message delivered");
        Ok(path)
    }

    /// Message files waiting to be processed, oldest first
    pub async fn pending_messages(&self) -> Result<Vec<PathBuf>, InboxError> {
        let mut messages = Vec::new();
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(messages),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                messages.push(path);
            }
        }
        messages.sort();
        Ok(messages)
    }

    /// Process every waiting message once
    pub async fn drain(&self, orchestrator: &WorkflowOrchestrator) -> Result<DrainReport, InboxError> {
        let mut report = DrainReport::default();

        for path in self.pending_messages().await? {
            let outcome = match Self::read_message(&path).await {
                Ok(message) => Self::dispatch(orchestrator, message)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(()) => {
                    fs::remove_file(&path).await?;
                    report.processed += 1;
                }
                Err(reason) => {
                    warn!(file = ?path, reason = %reason, "Inbox message rejected");
                    self.reject(&path, &reason).await?;
                    report.rejected += 1;
                }
            }
        }

        if report.processed + report.rejected > 0 {
            info!(
                processed = report.processed,
                rejected = report.rejected,
                "Inbox drained"
            );
        }
        Ok(report)
    }

    /// Drain every `poll_interval` until shutdown
    pub async fn run(
        self,
        orchestrator: WorkflowOrchestrator,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(directory = ?self.directory, "Watching callback inbox");
        loop {
            if let Err(e) = self.drain(&orchestrator).await {
                error!(error = %e, "Failed to drain callback inbox");
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Callback inbox stopped");
                    return;
                }
            }
        }
    }

    async fn read_message(path: &Path) -> Result<InboxMessage, InboxError> {
        let contents = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    async fn dispatch(
        orchestrator: &WorkflowOrchestrator,
        message: InboxMessage,
    ) -> Result<(), WorkflowError> {
        match message {
            InboxMessage::ManifestReady {
                run_id: Some(run_id),
                token,
                manifest,
            } => orchestrator.resume(&run_id, token, manifest).await,
            InboxMessage::ManifestReady {
                run_id: None,
                token,
                manifest,
            } => orchestrator.resume_by_token(token, manifest).await.map(|_| ()),
            InboxMessage::Cancel { run_id } => orchestrator.cancel(&run_id).await,
            InboxMessage::Start { source } => {
                let run_id = orchestrator.start(source).await?;
                info!(run_id = %run_id, "Run started from inbox");
                Ok(())
            }
        }
    }

    async fn reject(&self, path: &Path, reason: &str) -> Result<(), InboxError> {
        let rejected_dir = self.rejected_dir();
        fs::create_dir_all(&rejected_dir).await?;

        let Some(file_name) = path.file_name() else {
            return Ok(());
        };
        let target = rejected_dir.join(file_name);
        fs::rename(path, &target).await?;
        fs::write(target.with_extension("error"), reason).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_message_wire_format() {
        let message: InboxMessage = serde_json::from_str(
            r#"{
                "type": "manifest-ready",
                "token": "T",
                "manifest": {"location": "s3-equivalent://runtime/manifest.csv", "checksum": "abc"}
            }"#,
        )
        .unwrap();

        assert_eq!(
            message,
            InboxMessage::ManifestReady {
                run_id: None,
                token: ContinuationToken("T".to_string()),
                manifest: ManifestRef::new("s3-equivalent://runtime/manifest.csv", "abc"),
            }
        );

        let cancel: InboxMessage =
            serde_json::from_str(r#"{"type": "cancel", "run_id": "run-1"}"#).unwrap();
        assert_eq!(
            cancel,
            InboxMessage::Cancel {
                run_id: RunId("run-1".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_delivered_messages_are_listed_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let inbox = CallbackInbox::new(temp_dir.path());

        let first = inbox
            .deliver(&InboxMessage::Cancel {
                run_id: RunId("a".to_string()),
            })
            .await
            .unwrap();
        let second = inbox
            .deliver(&InboxMessage::Cancel {
                run_id: RunId("b".to_string()),
            })
            .await
            .unwrap();

        let pending = inbox.pending_messages().await.unwrap();
        assert_eq!(pending, vec![first, second]);
    }

    #[tokio::test]
    async fn test_missing_directory_has_no_messages() {
        let temp_dir = TempDir::new().unwrap();
        let inbox = CallbackInbox::new(temp_dir.path().join("absent"));
        assert!(inbox.pending_messages().await.unwrap().is_empty());
    }
}
