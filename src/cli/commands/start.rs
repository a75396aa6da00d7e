use anyhow::{anyhow, Result};

use super::{inbox, Command};
use crate::config::OrchestratorConfig;
use crate::workflow::{InboxMessage, SourceSpec};

pub struct StartCommand {
    config: OrchestratorConfig,
    location: Option<String>,
    prefix: Option<String>,
    pattern: Option<String>,
}

impl StartCommand {
    pub fn new(
        config: OrchestratorConfig,
        location: Option<String>,
        prefix: Option<String>,
        pattern: Option<String>,
    ) -> Self {
        Self {
            config,
            location,
            prefix,
            pattern,
        }
    }

    /// Command-line filters override the configured default source
    fn source(&self) -> Result<SourceSpec> {
        let mut source = match (&self.location, self.config.source.source_spec()) {
            (Some(location), _) => SourceSpec::new(location.clone()),
            (None, Some(configured)) => configured,
            (None, None) => {
                return Err(anyhow!(
                    "no source given: pass --location or set [source] location in the configuration"
                ))
            }
        };
        if let Some(prefix) = &self.prefix {
            source = source.with_prefix(prefix.clone());
        }
        if let Some(pattern) = &self.pattern {
            source = source.with_pattern(pattern.clone());
        }
        source.validate()?;
        Ok(source)
    }
}

impl Command for StartCommand {
    async fn execute(&self) -> Result<()> {
        let source = self.source()?;
        let path = inbox(&self.config)
            .deliver(&InboxMessage::Start {
                source: source.clone(),
            })
            .await?;

        println!("🚀 Start requested for {}", source.location);
        println!("   📨 Queued as {}", path.display());
        println!("   💡 The serving orchestrator picks it up on its next inbox pass");
        Ok(())
    }
}
