use anyhow::{anyhow, Result};
use std::path::PathBuf;

use super::Command;
use crate::config::{OrchestratorConfig, DEFAULT_CONFIG_FILE};

/// Writes a starter configuration; never overwrites without `--force`
pub struct InitCommand {
    path: PathBuf,
    force: bool,
    dry_run: bool,
}

impl InitCommand {
    pub fn new(path: Option<PathBuf>, force: bool, dry_run: bool) -> Self {
        Self {
            path: path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            force,
            dry_run,
        }
    }
}

impl Command for InitCommand {
    async fn execute(&self) -> Result<()> {
        let starter = OrchestratorConfig::starter();

        if self.dry_run {
            println!("🚀 ETL ORCHESTRATOR INIT (DRY RUN)");
            println!("   Would write {}:", self.path.display());
            println!();
            println!("{}", toml::to_string_pretty(&starter)?);
            return Ok(());
        }

        if self.path.exists() && !self.force {
            return Err(anyhow!(
                "{} already exists; use --force to overwrite it",
                self.path.display()
            ));
        }

        starter.save_to_file(&self.path)?;
        println!("✅ Wrote {}", self.path.display());
        println!("   ⚙️  Configure [collaborators] manifest_command, launch_command and status_command");
        println!("   🚀 Then run: etl-orchestrator serve");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("etl-orchestrator.toml");
        std::fs::write(&path, "# existing").unwrap();

        let result = InitCommand::new(Some(path.clone()), false, false).execute().await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# existing");

        InitCommand::new(Some(path.clone()), true, false)
            .execute()
            .await
            .unwrap();
        assert!(OrchestratorConfig::load(Some(&path)).is_ok());
    }
}
