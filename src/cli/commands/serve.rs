use anyhow::{anyhow, Context, Result};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{build_collaborators, inbox, Command};
use crate::config::OrchestratorConfig;
use crate::database::open_run_store;
use crate::shutdown::ShutdownCoordinator;
use crate::workflow::{ArchiveRetention, TriggerSchedule, WorkflowOrchestrator};

/// Long-running orchestrator process
pub struct ServeCommand {
    config: OrchestratorConfig,
}

impl ServeCommand {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    fn lock_path(&self) -> PathBuf {
        PathBuf::from(&self.config.persistence.directory).join("serve.lock")
    }
}

impl Command for ServeCommand {
    async fn execute(&self) -> Result<()> {
        // Only one serving process may own the state directory
        std::fs::create_dir_all(&self.config.persistence.directory).with_context(|| {
            format!(
                "cannot create state directory {}",
                self.config.persistence.directory
            )
        })?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.try_write().map_err(|_| {
            anyhow!(
                "another orchestrator is already serving {}",
                self.config.persistence.directory
            )
        })?;

        let store = open_run_store(&self.config).await?;
        let orchestrator = WorkflowOrchestrator::new(
            self.config.orchestrator_settings(),
            build_collaborators(&self.config)?,
            store.clone(),
        );

        let recovered = orchestrator.recover().await?;
        info!(recovered, "Orchestrator serving");

        let coordinator = ShutdownCoordinator::new();

        let inbox_task = tokio::spawn(inbox(&self.config).run(
            orchestrator.clone(),
            Duration::from_secs(self.config.inbox.poll_interval_seconds),
            coordinator.subscribe(),
        ));

        let retention_task = tokio::spawn(
            ArchiveRetention::new(
                self.config.persistence.archive_retention_days,
                Duration::from_secs(self.config.persistence.archive_cleanup_interval_seconds),
            )
            .run(store.clone(), coordinator.subscribe()),
        );

        let trigger_task = match (
            self.config.trigger.interval_seconds,
            self.config.source.source_spec(),
        ) {
            (Some(interval), Some(source)) => Some(tokio::spawn(
                TriggerSchedule::new(Duration::from_secs(interval), source)
                    .run(orchestrator.clone(), coordinator.subscribe()),
            )),
            _ => None,
        };

        if let Err(e) = coordinator.wait_for_signal().await {
            error!(error = %e, "Signal handling failed, shutting down");
            coordinator.trigger();
        }

        if let Err(e) = inbox_task.await {
            warn!(error = %e, "Callback inbox task ended abnormally");
        }
        if let Err(e) = retention_task.await {
            warn!(error = %e, "Archive retention task ended abnormally");
        }
        if let Some(task) = trigger_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Trigger task ended abnormally");
            }
        }

        ShutdownCoordinator::shutdown_all_services(&orchestrator).await
    }
}
