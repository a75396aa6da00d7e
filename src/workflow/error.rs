use thiserror::Error;

use super::persistence::PersistenceError;
use super::types::{FailureCause, Phase, RunId};

/// Errors raised by the workflow orchestrator
///
/// The first group mirrors the fatal conditions a run can end in; each of them is
/// converted into a FAILED terminal record rather than propagated out of the run.
/// The second group is returned to API callers only.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("upstream unavailable: {operation} failed after {attempts} attempts: {last_error}")]
    UpstreamUnavailable {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("external job reported FAILED")]
    JobFailed { detail: Option<String> },

    #[error("workflow timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("invalid transition: {event} not allowed in phase {phase}")]
    InvalidTransition { phase: Phase, event: String },

    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("run {run_id} already finished in phase {phase}")]
    RunTerminated { run_id: RunId, phase: Phase },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl WorkflowError {
    /// Errors that abort the run they occur in
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkflowError::Protocol { .. }
                | WorkflowError::UpstreamUnavailable { .. }
                | WorkflowError::JobFailed { .. }
                | WorkflowError::Timeout
                | WorkflowError::Cancelled
        )
    }

    /// Terminal cause recorded for a fatal error
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            WorkflowError::Protocol { reason } => Some(FailureCause::protocol(reason.clone())),
            WorkflowError::UpstreamUnavailable {
                operation,
                attempts,
                last_error,
            } => Some(FailureCause::upstream_unavailable(format!(
                "{} failed after {} attempts: {}",
                operation, attempts, last_error
            ))),
            WorkflowError::JobFailed { detail } => Some(FailureCause::job_failed(detail.clone())),
            WorkflowError::Timeout => Some(FailureCause::timeout()),
            WorkflowError::Cancelled => Some(FailureCause::cancelled()),
            _ => None,
        }
    }
}

impl From<PersistenceError> for WorkflowError {
    fn from(err: PersistenceError) -> Self {
        WorkflowError::Persistence(err.to_string())
    }
}
