use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

use super::orchestrator::WorkflowOrchestrator;
use super::types::SourceSpec;
use crate::shutdown::wait_for_shutdown;

/// Periodic clock that starts a new run from a fixed source
///
/// The first run starts one full interval after `run` is called. Ticks missed while
/// the process was busy are skipped rather than replayed.
#[derive(Debug, Clone)]
pub struct TriggerSchedule {
    interval: Duration,
    source: SourceSpec,
}

impl TriggerSchedule {
    pub fn new(interval: Duration, source: SourceSpec) -> Self {
        Self { interval, source }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fire until shutdown; returns how many runs it started
    pub async fn run(
        self,
        orchestrator: WorkflowOrchestrator,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut started = 0;

        info!(
            interval_secs = self.interval.as_secs(),
            location = %self.source.location,
            "Trigger schedule armed"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match orchestrator.start(self.source.clone()).await {
                        Ok(run_id) => {
                            info!(run_id = %run_id, "Trigger fired, run started");
                            started += 1;
                        }
                        Err(e) => error!(error = %e, "Trigger fired but the run could not start"),
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!(runs_started = started, "Trigger schedule stopped");
                    return started;
                }
            }
        }
    }
}
