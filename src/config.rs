use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::workflow::{OrchestratorSettings, PersistenceConfig, SourceSpec};

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "etl-orchestrator.toml";

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "ETL_ORCHESTRATOR";

/// Main configuration structure for the orchestrator
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    pub workflow: WorkflowConfig,
    /// Default source for triggered runs
    #[serde(default)]
    pub source: SourceConfig,
    pub collaborators: CollaboratorConfig,
    pub notifications: NotificationConfig,
    pub persistence: PersistenceSection,
    #[serde(default)]
    pub trigger: TriggerConfig,
    pub inbox: InboxConfig,
    pub observability: ObservabilityConfig,
    /// Database settings (optional)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowConfig {
    pub poll_interval_seconds: u64,
    /// Wall-clock ceiling for a run; has no default and must be configured
    pub workflow_timeout_seconds: u64,
    pub max_upstream_retries: u32,
    pub notify_timeout_seconds: u64,
    /// Per-item handler the batch job invokes
    pub handler_ref: String,
    pub max_transition_history: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SourceConfig {
    pub location: Option<String>,
    pub prefix: Option<String>,
    pub pattern: Option<String>,
}

impl SourceConfig {
    pub fn source_spec(&self) -> Option<SourceSpec> {
        let location = self.location.as_ref()?;
        Some(SourceSpec {
            location: location.clone(),
            prefix: self.prefix.clone(),
            pattern: self.pattern.clone(),
        })
    }
}

/// External program exchanging JSON with the orchestrator
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CollaboratorConfig {
    #[serde(default)]
    pub manifest_command: Option<CommandSpec>,
    #[serde(default)]
    pub launch_command: Option<CommandSpec>,
    #[serde(default)]
    pub status_command: Option<CommandSpec>,
    #[serde(default)]
    pub ingestion_command: Option<CommandSpec>,
    pub command_timeout_seconds: u64,
    /// Rate limit applied to status checks across all runs
    pub status_requests_per_minute: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NotificationConfig {
    /// Notifications are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub requests_per_minute: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PersistenceSection {
    pub directory: String,
    pub max_transition_history_entries: usize,
    pub archive_retention_days: u32,
    /// How often a serving process sweeps expired archives
    pub archive_cleanup_interval_seconds: u64,
    pub enable_integrity_checks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TriggerConfig {
    /// Start a run from the default source at this interval; disabled when unset
    pub interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InboxConfig {
    pub directory: String,
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl OrchestratorConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (`path`, or `etl-orchestrator.toml` when present)
    /// 3. Environment variables (prefixed with `ETL_ORCHESTRATOR__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Self::defaults()?;

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        Self::build(builder)
    }

    /// Load from TOML text layered over the defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let builder = Self::defaults()?.add_source(File::from_str(contents, FileFormat::Toml));
        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build()?;
        let orchestrator_config: OrchestratorConfig = config.try_deserialize().context(
            "invalid configuration (workflow.workflow_timeout_seconds has no default and must be set)",
        )?;
        orchestrator_config.validate()?;
        Ok(orchestrator_config)
    }

    /// Built-in defaults for every key except the workflow timeout
    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            .set_default("workflow.poll_interval_seconds", 30)?
            .set_default("workflow.max_upstream_retries", 3)?
            .set_default("workflow.notify_timeout_seconds", 10)?
            .set_default("workflow.handler_ref", "rdf-conversion-handler")?
            .set_default("workflow.max_transition_history", 500)?
            .set_default("collaborators.command_timeout_seconds", 60)?
            .set_default("collaborators.status_requests_per_minute", 60)?
            .set_default("notifications.requests_per_minute", 30)?
            .set_default("persistence.directory", ".etl-orchestrator/state")?
            .set_default("persistence.max_transition_history_entries", 500)?
            .set_default("persistence.archive_retention_days", 30)?
            .set_default("persistence.archive_cleanup_interval_seconds", 3600)?
            .set_default("persistence.enable_integrity_checks", true)?
            .set_default("inbox.directory", ".etl-orchestrator/inbox")?
            .set_default("inbox.poll_interval_seconds", 5)?
            .set_default("observability.log_level", "info")?
            .set_default("observability.json_logs", true)?;
        Ok(builder)
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workflow.workflow_timeout_seconds == 0 {
            bail!("workflow.workflow_timeout_seconds must be greater than zero");
        }
        if self.workflow.poll_interval_seconds == 0 {
            bail!("workflow.poll_interval_seconds must be greater than zero");
        }
        if self.workflow.notify_timeout_seconds == 0 {
            bail!("workflow.notify_timeout_seconds must be greater than zero");
        }
        if self.collaborators.command_timeout_seconds == 0 {
            bail!("collaborators.command_timeout_seconds must be greater than zero");
        }
        if self.collaborators.status_requests_per_minute == 0 {
            bail!("collaborators.status_requests_per_minute must be greater than zero");
        }
        if self.notifications.requests_per_minute == 0 {
            bail!("notifications.requests_per_minute must be greater than zero");
        }
        if self.persistence.archive_cleanup_interval_seconds == 0 {
            bail!("persistence.archive_cleanup_interval_seconds must be greater than zero");
        }
        if self.inbox.poll_interval_seconds == 0 {
            bail!("inbox.poll_interval_seconds must be greater than zero");
        }
        if let Some(interval) = self.trigger.interval_seconds {
            if interval == 0 {
                bail!("trigger.interval_seconds must be greater than zero");
            }
            if self.source.location.is_none() {
                bail!("trigger.interval_seconds requires source.location");
            }
        }
        if let Some(source) = self.source.source_spec() {
            source
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid [source] section: {}", e))?;
        }
        Ok(())
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings::new(Duration::from_secs(self.workflow.workflow_timeout_seconds))
            .with_poll_interval(Duration::from_secs(self.workflow.poll_interval_seconds))
            .with_max_upstream_retries(self.workflow.max_upstream_retries)
            .with_notify_timeout(Duration::from_secs(self.workflow.notify_timeout_seconds))
            .with_handler(self.workflow.handler_ref.clone())
            .with_max_transition_history(self.workflow.max_transition_history)
    }

    pub fn persistence_config(&self) -> PersistenceConfig {
        PersistenceConfig {
            persistence_directory: PathBuf::from(&self.persistence.directory),
            max_transition_history_entries: self.persistence.max_transition_history_entries,
            archive_retention_days: self.persistence.archive_retention_days,
            enable_integrity_checks: self.persistence.enable_integrity_checks,
        }
    }

    /// Starting point written by `init`
    pub fn starter() -> Self {
        Self {
            workflow: WorkflowConfig {
                poll_interval_seconds: 30,
                workflow_timeout_seconds: 300,
                max_upstream_retries: 3,
                notify_timeout_seconds: 10,
                handler_ref: "rdf-conversion-handler".to_string(),
                max_transition_history: 500,
            },
            source: SourceConfig {
                location: Some("s3-equivalent://source-bucket/".to_string()),
                prefix: None,
                pattern: None,
            },
            collaborators: CollaboratorConfig {
                manifest_command: None,
                launch_command: None,
                status_command: None,
                ingestion_command: None,
                command_timeout_seconds: 60,
                status_requests_per_minute: 60,
            },
            notifications: NotificationConfig {
                webhook_url: None,
                requests_per_minute: 30,
            },
            persistence: PersistenceSection {
                directory: ".etl-orchestrator/state".to_string(),
                max_transition_history_entries: 500,
                archive_retention_days: 30,
                archive_cleanup_interval_seconds: 3600,
                enable_integrity_checks: true,
            },
            trigger: TriggerConfig {
                interval_seconds: None,
            },
            inbox: InboxConfig {
                directory: ".etl-orchestrator/inbox".to_string(),
                poll_interval_seconds: 5,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
            database: None,
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
