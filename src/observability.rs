use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Process-wide orchestrator counters
#[derive(Debug, Default)]
pub struct OrchestratorMetrics {
    pub runs_started: AtomicU64,
    pub runs_succeeded: AtomicU64,
    pub runs_failed: AtomicU64,
    pub transitions: AtomicU64,
    pub status_polls: AtomicU64,
    pub upstream_errors: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub notification_failures: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub callbacks_rejected: AtomicU64,
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_succeeded(&self) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_poll(&self) {
        self.status_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Notification delivery failed");
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_rejected(&self) {
        self.callbacks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            status_polls: self.status_polls.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            callbacks_rejected: self.callbacks_rejected.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            runs_started = stats.runs_started,
            runs_succeeded = stats.runs_succeeded,
            runs_failed = stats.runs_failed,
            transitions = stats.transitions,
            status_polls = stats.status_polls,
            upstream_errors = stats.upstream_errors,
            notifications_sent = stats.notifications_sent,
            notification_failures = stats.notification_failures,
            persistence_failures = stats.persistence_failures,
            callbacks_rejected = stats.callbacks_rejected,
            "Orchestrator metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub transitions: u64,
    pub status_polls: u64,
    pub upstream_errors: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
    pub persistence_failures: u64,
    pub callbacks_rejected: u64,
}

/// Global metrics instance
static ORCHESTRATOR_METRICS: std::sync::LazyLock<OrchestratorMetrics> =
    std::sync::LazyLock::new(OrchestratorMetrics::new);

pub fn orchestrator_metrics() -> &'static OrchestratorMetrics {
    &ORCHESTRATOR_METRICS
}

/// Span correlating every log line of one workflow run
pub fn create_run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("workflow_run", run.id = run_id)
}

/// Time an operation and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}
