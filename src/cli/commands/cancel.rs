use anyhow::Result;

use super::{inbox, Command};
use crate::config::OrchestratorConfig;
use crate::workflow::{InboxMessage, RunId};

pub struct CancelCommand {
    config: OrchestratorConfig,
    run_id: RunId,
}

impl CancelCommand {
    pub fn new(config: OrchestratorConfig, run_id: String) -> Self {
        Self {
            config,
            run_id: RunId(run_id),
        }
    }
}

impl Command for CancelCommand {
    async fn execute(&self) -> Result<()> {
        let path = inbox(&self.config)
            .deliver(&InboxMessage::Cancel {
                run_id: self.run_id.clone(),
            })
            .await?;

        println!("🛑 Cancellation queued for run {}", self.run_id);
        println!("   📨 Queued as {}", path.display());
        println!("   💡 Only runs waiting for a manifest or polling the job can be cancelled");
        Ok(())
    }
}
