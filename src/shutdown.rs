use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::observability::orchestrator_metrics;
use crate::workflow::WorkflowOrchestrator;

/// Graceful shutdown coordinator for the serving process
///
/// Background loops hold a receiver from `subscribe` and stop once it flips to true.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Broadcast shutdown without waiting for a signal
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait for SIGINT/SIGTERM, then broadcast shutdown
    pub async fn wait_for_signal(&self) -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on SIGINT/SIGTERM");

        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = terminate.recv() => {}
            }
        }

        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await?;

        info!("Shutdown signal received");
        self.trigger();
        Ok(())
    }

    /// Stop run drivers and log final statistics
    ///
    /// Runs in flight stay persisted and resume on the next `recover`.
    pub async fn shutdown_all_services(orchestrator: &WorkflowOrchestrator) -> Result<()> {
        info!("Initiating graceful shutdown of all services...");

        let active = orchestrator.active_runs().await.len();
        if timeout(Duration::from_secs(10), orchestrator.shutdown())
            .await
            .is_err()
        {
            warn!("Timeout waiting for workflow drivers to stop");
        }

        orchestrator_metrics().log_stats();
        info!(suspended_runs = active, "Graceful shutdown completed successfully");
        Ok(())
    }
}

/// Resolve once `receiver` reports shutdown or its sender is gone
pub async fn wait_for_shutdown(receiver: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *receiver.borrow_and_update();
        if stopping || receiver.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let mut receiver = coordinator.subscribe();
        assert!(!coordinator.is_shutting_down());

        let waiter = tokio::spawn(async move {
            wait_for_shutdown(&mut receiver).await;
        });
        coordinator.trigger();

        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(coordinator.is_shutting_down());
    }
}
