use anyhow::{anyhow, Result};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::OrchestratorConfig;
use crate::external::{
    CommandExecutor, CommandIngestionHandoff, CommandJobLauncher, CommandManifestGateway,
    CommandStatusPoller, ProcessCommandExecutor, RateLimitedStatusPoller, TracingNotifier,
    WebhookNotifier,
};
use crate::workflow::{CallbackInbox, Collaborators, Notifier, StatusPoller};

pub mod cancel;
pub mod init;
pub mod list;
pub mod resume;
pub mod serve;
pub mod start;
pub mod status;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Load `.env`, then the layered configuration
pub fn load_config(path: Option<&Path>) -> Result<OrchestratorConfig> {
    OrchestratorConfig::load_env_file()?;
    OrchestratorConfig::load(path)
}

pub fn inbox(config: &OrchestratorConfig) -> CallbackInbox {
    CallbackInbox::new(PathBuf::from(&config.inbox.directory))
}

fn non_zero(value: u32, key: &str) -> Result<NonZeroU32> {
    NonZeroU32::new(value).ok_or_else(|| anyhow!("{} must be greater than zero", key))
}

/// Wire the command-backed collaborators and the notifier from configuration
///
/// The manifest, launch and status commands are required; without an ingestion
/// command the hand-off is a no-op.
pub fn build_collaborators(config: &OrchestratorConfig) -> Result<Collaborators> {
    let section = &config.collaborators;
    let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessCommandExecutor::new(
        Duration::from_secs(section.command_timeout_seconds),
    ));

    let manifest = section
        .manifest_command
        .clone()
        .ok_or_else(|| anyhow!("collaborators.manifest_command must be configured"))?;
    let launch = section
        .launch_command
        .clone()
        .ok_or_else(|| anyhow!("collaborators.launch_command must be configured"))?;
    let status = section
        .status_command
        .clone()
        .ok_or_else(|| anyhow!("collaborators.status_command must be configured"))?;

    let status_poller: Arc<dyn StatusPoller> = Arc::new(RateLimitedStatusPoller::new(
        Arc::new(CommandStatusPoller::new(executor.clone(), status)),
        non_zero(
            section.status_requests_per_minute,
            "collaborators.status_requests_per_minute",
        )?,
    ));

    let mut collaborators = Collaborators::new(
        Arc::new(CommandManifestGateway::new(executor.clone(), manifest)),
        Arc::new(CommandJobLauncher::new(executor.clone(), launch)),
        status_poller,
        build_notifier(config)?,
    );

    if let Some(ingestion) = section.ingestion_command.clone() {
        collaborators =
            collaborators.with_ingestion(Arc::new(CommandIngestionHandoff::new(executor, ingestion)));
    }

    Ok(collaborators)
}

fn build_notifier(config: &OrchestratorConfig) -> Result<Arc<dyn Notifier>> {
    match &config.notifications.webhook_url {
        Some(url) => {
            info!(url = %url, "Publishing notifications to webhook");
            let notifier = WebhookNotifier::new(
                url.clone(),
                non_zero(
                    config.notifications.requests_per_minute,
                    "notifications.requests_per_minute",
                )?,
                Duration::from_secs(config.workflow.notify_timeout_seconds),
            )?;
            Ok(Arc::new(notifier))
        }
        None => {
            info!("No webhook configured, notifications are logged only");
            Ok(Arc::new(TracingNotifier))
        }
    }
}
