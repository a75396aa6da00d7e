use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize structured logging
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to stderr so command
/// output on stdout stays parseable. JSON output carries the current span so every
/// line of a run is tagged with its run id.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    if config.json_logs {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(filter)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(filter)
            .try_init()?;
    }

    tracing::info!(
        log_level = %config.log_level,
        json = config.json_logs,
        "ETL orchestrator telemetry initialized"
    );
    Ok(())
}

/// Flush point for shutdown; the fmt layers write synchronously
pub fn shutdown_telemetry() {
    tracing::info!("ETL orchestrator telemetry shutdown complete");
}
