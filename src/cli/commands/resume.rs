use anyhow::Result;

use super::{inbox, Command};
use crate::config::OrchestratorConfig;
use crate::workflow::{ContinuationToken, InboxMessage, ManifestRef, RunId};

/// Delivers the manifest-ready callback through the inbox
pub struct ResumeCommand {
    config: OrchestratorConfig,
    run_id: Option<RunId>,
    token: ContinuationToken,
    manifest: ManifestRef,
}

impl ResumeCommand {
    pub fn new(
        config: OrchestratorConfig,
        run_id: Option<String>,
        token: String,
        manifest: ManifestRef,
    ) -> Self {
        Self {
            config,
            run_id: run_id.map(RunId),
            token: ContinuationToken(token),
            manifest,
        }
    }
}

impl Command for ResumeCommand {
    async fn execute(&self) -> Result<()> {
        let path = inbox(&self.config)
            .deliver(&InboxMessage::ManifestReady {
                run_id: self.run_id.clone(),
                token: self.token.clone(),
                manifest: self.manifest.clone(),
            })
            .await?;

        match &self.run_id {
            Some(run_id) => println!("📦 Manifest callback queued for run {}", run_id),
            None => println!("📦 Manifest callback queued for token {}", self.token),
        }
        println!("   📄 Manifest: {}", self.manifest.location);
        println!("   📨 Queued as {}", path.display());
        Ok(())
    }
}
