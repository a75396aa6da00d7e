use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::persistence::RunStore;
use crate::shutdown::wait_for_shutdown;

/// Periodic sweep removing archived runs older than the retention period
///
/// The first sweep happens as soon as `run` is called, then once per interval.
#[derive(Debug, Clone)]
pub struct ArchiveRetention {
    retention: chrono::Duration,
    interval: Duration,
}

impl ArchiveRetention {
    pub fn new(retention_days: u32, interval: Duration) -> Self {
        Self {
            retention: chrono::Duration::days(i64::from(retention_days)),
            interval,
        }
    }

    /// Remove every archive last updated before now minus the retention period
    pub async fn sweep(&self, store: &dyn RunStore) -> usize {
        let cutoff = Utc::now() - self.retention;
        match store.cleanup_archive(cutoff).await {
            Ok(removed) if removed > 0 => {
                info!(removed, cutoff = %cutoff, "Expired archived runs removed");
                removed
            }
            Ok(_) => {
                debug!(cutoff = %cutoff, "No expired archived runs");
                0
            }
            Err(e) => {
                warn!(error = %e, "Archive cleanup failed");
                0
            }
        }
    }

    /// Sweep until shutdown; returns how many archives were removed in total
    pub async fn run(self, store: Arc<dyn RunStore>, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut removed = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    removed += self.sweep(store.as_ref()).await;
                }
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!(removed, "Archive retention stopped");
                    return removed;
                }
            }
        }
    }
}
