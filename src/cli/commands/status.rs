use anyhow::{anyhow, Result};

use super::Command;
use crate::config::OrchestratorConfig;
use crate::database::open_run_store;
use crate::workflow::{Outcome, RunId, RunStatusReport};

/// Reads one run straight from the store; works whether or not `serve` is running
pub struct StatusCommand {
    config: OrchestratorConfig,
    run_id: RunId,
    json: bool,
}

impl StatusCommand {
    pub fn new(config: OrchestratorConfig, run_id: String) -> Self {
        Self {
            config,
            run_id: RunId(run_id),
            json: false,
        }
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

impl Command for StatusCommand {
    async fn execute(&self) -> Result<()> {
        let store = open_run_store(&self.config).await?;
        let run = store
            .load(&self.run_id)
            .await?
            .ok_or_else(|| anyhow!("run {} not found", self.run_id))?;
        let report = RunStatusReport::from(&run);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        print_report(&report);
        Ok(())
    }
}

fn print_report(report: &RunStatusReport) {
    println!("📋 RUN {}", report.run_id);
    println!("==========================");
    println!("   🔧 Phase: {}", report.phase);
    println!("   🕐 Created: {}", report.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("   ⏰ Deadline: {}", report.deadline.format("%Y-%m-%d %H:%M:%S UTC"));

    if let Some(manifest) = &report.manifest_ref {
        println!("   📄 Manifest: {} ({})", manifest.location, manifest.checksum);
    }
    if let Some(job_id) = &report.job_id {
        println!("   ⚙️  Job: {}", job_id);
    }
    if let Some(status) = &report.last_status {
        match &status.detail {
            Some(detail) => println!(
                "   📡 Last status: {} after {} polls ({})",
                status.status, report.poll_attempts, detail
            ),
            None => println!(
                "   📡 Last status: {} after {} polls",
                status.status, report.poll_attempts
            ),
        }
    }
    println!("   🔀 Transitions: {}", report.transitions_count);

    if let Some(result) = &report.terminal_result {
        match result.outcome {
            Outcome::Success => println!("   ✅ Succeeded: {}", result.detail),
            Outcome::Failure => {
                println!("   ❌ Failed: {}", result.detail);
                if let Some(context) = &result.context {
                    println!("      {}", context);
                }
            }
        }
    }
}
