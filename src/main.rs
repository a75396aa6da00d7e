use anyhow::Result;
use clap::Parser;

use etl_orchestrator::cli::commands::{
    cancel::CancelCommand, init::InitCommand, list::ListCommand, load_config,
    resume::ResumeCommand, serve::ServeCommand, start::StartCommand, status::StatusCommand,
    Command,
};
use etl_orchestrator::cli::{Cli, Commands};
use etl_orchestrator::telemetry::{init_telemetry, shutdown_telemetry};
use etl_orchestrator::workflow::ManifestRef;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // init must work before any configuration exists
    if let Commands::Init { force, dry_run } = cli.command {
        return tokio::runtime::Runtime::new()?
            .block_on(async { InitCommand::new(cli.config, force, dry_run).execute().await });
    }

    let config = load_config(cli.config.as_deref())?;
    init_telemetry(&config.observability)?;

    let result = tokio::runtime::Runtime::new()?.block_on(async {
        match cli.command {
            Commands::Serve => ServeCommand::new(config).execute().await,
            Commands::Start {
                location,
                prefix,
                pattern,
            } => {
                StartCommand::new(config, location, prefix, pattern)
                    .execute()
                    .await
            }
            Commands::Resume {
                token,
                manifest,
                checksum,
                run_id,
            } => {
                ResumeCommand::new(config, run_id, token, ManifestRef::new(manifest, checksum))
                    .execute()
                    .await
            }
            Commands::Cancel { run_id } => CancelCommand::new(config, run_id).execute().await,
            Commands::Status { run_id, json } => {
                StatusCommand::new(config, run_id)
                    .with_json(json)
                    .execute()
                    .await
            }
            Commands::List { all } => ListCommand::new(config, all).execute().await,
            Commands::Init { .. } => Ok(()),
        }
    });

    shutdown_telemetry();
    result
}
