use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "etl-orchestrator")]
#[command(about = "Durable orchestration of the ETL ingestion workflow")]
#[command(long_about = "Drives each ingestion run through manifest building, batch conversion, \
                       status polling and ingestion hand-off, persisting every step so runs \
                       survive restarts. Start the long-running process with 'etl-orchestrator serve'.")]
pub struct Cli {
    /// Configuration file (defaults to ./etl-orchestrator.toml when present)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the orchestrator: recover persisted runs, drain the callback inbox and fire the trigger
    Serve,
    /// Ask the serving orchestrator to start a run
    Start {
        /// Source location (defaults to [source] in the configuration)
        #[arg(long)]
        location: Option<String>,
        /// Only include objects under this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Only include objects whose key matches this regular expression
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Deliver a manifest-ready callback for a run suspended in BUILD_MANIFEST
    Resume {
        /// Continuation token issued by the manifest gateway
        #[arg(long)]
        token: String,
        /// Location of the built manifest
        #[arg(long)]
        manifest: String,
        /// Checksum of the manifest contents
        #[arg(long)]
        checksum: String,
        /// Run the token belongs to (resolved from the token when omitted)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Ask the serving orchestrator to cancel a run
    Cancel {
        run_id: String,
    },
    /// Show the persisted state of one run
    Status {
        run_id: String,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List active runs, and archived ones with --all
    List {
        #[arg(long)]
        all: bool,
    },
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
        /// Show what would be written without making changes
        #[arg(long)]
        dry_run: bool,
    },
}
