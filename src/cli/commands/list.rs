use anyhow::Result;

use super::Command;
use crate::config::OrchestratorConfig;
use crate::database::open_run_store;
use crate::workflow::WorkflowRun;

pub struct ListCommand {
    config: OrchestratorConfig,
    include_archived: bool,
}

impl ListCommand {
    pub fn new(config: OrchestratorConfig, include_archived: bool) -> Self {
        Self {
            config,
            include_archived,
        }
    }
}

fn print_runs(runs: &[WorkflowRun]) {
    for run in runs {
        let job = run
            .job_id
            .as_ref()
            .map(|job_id| job_id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "   {} {:<20} job={} updated={}",
            run.run_id,
            run.phase,
            job,
            run.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

impl Command for ListCommand {
    async fn execute(&self) -> Result<()> {
        let store = open_run_store(&self.config).await?;

        let active = store.list_active().await?;
        println!("🔄 ACTIVE RUNS ({})", active.len());
        if active.is_empty() {
            println!("   No runs in flight");
        }
        print_runs(&active);

        if self.include_archived {
            let archived = store.list_archived().await?;
            println!();
            println!("📦 ARCHIVED RUNS ({})", archived.len());
            print_runs(&archived);
        }
        Ok(())
    }
}
