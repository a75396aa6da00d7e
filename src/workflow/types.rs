use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::error::WorkflowError;

/// Opaque identifier of one workflow run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token correlating a manifest request with its later callback
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(pub String);

impl ContinuationToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of the external batch job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the per-item handler the batch job invokes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerRef(pub String);

impl fmt::Display for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source listing a run converts: a location plus optional filters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub location: String,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Regular expression matched against the full item key, prefix included
    #[serde(default)]
    pub pattern: Option<String>,
}

impl SourceSpec {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            prefix: None,
            pattern: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.location.trim().is_empty() {
            return Err(WorkflowError::InvalidRequest {
                reason: "source location must not be empty".to_string(),
            });
        }
        if let Some(pattern) = &self.pattern {
            Regex::new(pattern).map_err(|e| WorkflowError::InvalidRequest {
                reason: format!("invalid source pattern '{}': {}", pattern, e),
            })?;
        }
        Ok(())
    }
}

/// Descriptor of a built manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
    pub location: String,
    pub checksum: String,
    #[serde(default)]
    pub total_items: Option<u64>,
}

impl ManifestRef {
    pub fn new(location: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            checksum: checksum.into(),
            total_items: None,
        }
    }
}

/// Orchestrator phases, in workflow order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Start,
    NotifyStart,
    BuildManifest,
    LaunchJob,
    Polling,
    CompleteConversion,
    StartIngestion,
    EndIngestion,
    NotifyEnd,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    /// Phases in which the run is parked waiting on something external
    pub fn is_suspended(self) -> bool {
        matches!(self, Phase::BuildManifest | Phase::Polling)
    }

    /// Position along the workflow graph; FAILED sits after everything
    pub fn ordinal(self) -> u8 {
        match self {
            Phase::Start => 0,
            Phase::NotifyStart => 1,
            Phase::BuildManifest => 2,
            Phase::LaunchJob => 3,
            Phase::Polling => 4,
            Phase::CompleteConversion => 5,
            Phase::StartIngestion => 6,
            Phase::EndIngestion => 7,
            Phase::NotifyEnd => 8,
            Phase::Done => 9,
            Phase::Failed => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Start => "START",
            Phase::NotifyStart => "NOTIFY_START",
            Phase::BuildManifest => "BUILD_MANIFEST",
            Phase::LaunchJob => "LAUNCH_JOB",
            Phase::Polling => "POLLING",
            Phase::CompleteConversion => "COMPLETE_CONVERSION",
            Phase::StartIngestion => "START_INGESTION",
            Phase::EndIngestion => "END_INGESTION",
            Phase::NotifyEnd => "NOTIFY_END",
            Phase::Done => "DONE",
            Phase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the external batch job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Finalizing,
    Succeeded,
    Failed,
    /// A value outside the known vocabulary; treated as still pending
    Unrecognized(String),
}

impl JobStatus {
    /// Map an external status string, accepting both the orchestrator's own names
    /// and the batch service vocabulary (New/Active/Completing/Complete/Failed).
    pub fn from_external(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" | "NEW" => JobStatus::Queued,
            "RUNNING" | "ACTIVE" => JobStatus::Running,
            "FINALIZING" | "COMPLETING" => JobStatus::Finalizing,
            "SUCCEEDED" | "COMPLETE" => JobStatus::Succeeded,
            "FAILED" => JobStatus::Failed,
            _ => JobStatus::Unrecognized(raw.to_string()),
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Finalizing => "FINALIZING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answer from the status poller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: JobStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self { status, detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
}

/// Category of a fatal condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Protocol,
    UpstreamUnavailable,
    JobFailed,
    Timeout,
    Cancelled,
}

/// Why a run failed: the stable cause string plus optional context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    pub kind: FailureKind,
    pub cause: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl FailureCause {
    pub const JOB_FAILED: &'static str = "external job reported FAILED";
    pub const UPSTREAM_UNAVAILABLE: &'static str = "upstream unavailable";
    pub const TIMEOUT: &'static str = "workflow timeout";
    pub const CANCELLED: &'static str = "cancelled";

    pub fn job_failed(detail: Option<String>) -> Self {
        Self {
            kind: FailureKind::JobFailed,
            cause: Self::JOB_FAILED.to_string(),
            context: detail,
        }
    }

    pub fn upstream_unavailable(context: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::UpstreamUnavailable,
            cause: Self::UPSTREAM_UNAVAILABLE.to_string(),
            context: Some(context.into()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: FailureKind::Timeout,
            cause: Self::TIMEOUT.to_string(),
            context: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            cause: Self::CANCELLED.to_string(),
            context: None,
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            kind: FailureKind::Protocol,
            cause: format!("protocol error: {}", reason),
            context: None,
        }
    }
}

/// Final record of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalResult {
    pub outcome: Outcome,
    #[serde(default)]
    pub kind: Option<FailureKind>,
    pub detail: String,
    #[serde(default)]
    pub context: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TerminalResult {
    pub fn success(finished_at: DateTime<Utc>) -> Self {
        Self {
            outcome: Outcome::Success,
            kind: None,
            detail: "workflow finished".to_string(),
            context: None,
            finished_at,
        }
    }

    pub fn failure(cause: FailureCause, finished_at: DateTime<Utc>) -> Self {
        Self {
            outcome: Outcome::Failure,
            kind: Some(cause.kind),
            detail: cause.cause,
            context: cause.context,
            finished_at,
        }
    }
}

/// Audit entry for one applied transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// A manifest request waiting for its callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub token: ContinuationToken,
    pub run_id: RunId,
    pub requested_at: DateTime<Utc>,
}

/// One execution of the ingestion workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: RunId,
    pub source: SourceSpec,
    pub phase: Phase,
    pub manifest_ref: Option<ManifestRef>,
    pub job_id: Option<JobId>,
    pub continuation_token: Option<ContinuationToken>,
    pub last_status: Option<StatusReport>,
    pub poll_attempts: u32,
    #[serde(default)]
    pub upstream_failures: u32,
    pub terminal_result: Option<TerminalResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

impl WorkflowRun {
    pub fn new(source: SourceSpec, now: DateTime<Utc>, timeout: std::time::Duration) -> Self {
        let timeout = Duration::from_std(timeout).unwrap_or(Duration::MAX);
        Self {
            run_id: RunId::generate(),
            source,
            phase: Phase::Start,
            manifest_ref: None,
            job_id: None,
            continuation_token: None,
            last_status: None,
            poll_attempts: 0,
            upstream_failures: 0,
            terminal_result: None,
            created_at: now,
            updated_at: now,
            deadline: now.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC),
            transitions: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Point-in-time view of a run for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub run_id: RunId,
    pub phase: Phase,
    pub last_status: Option<StatusReport>,
    pub poll_attempts: u32,
    pub job_id: Option<JobId>,
    pub manifest_ref: Option<ManifestRef>,
    pub terminal_result: Option<TerminalResult>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub transitions_count: usize,
}

impl From<&WorkflowRun> for RunStatusReport {
    fn from(run: &WorkflowRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            phase: run.phase,
            last_status: run.last_status.clone(),
            poll_attempts: run.poll_attempts,
            job_id: run.job_id.clone(),
            manifest_ref: run.manifest_ref.clone(),
            terminal_result: run.terminal_result.clone(),
            created_at: run.created_at,
            deadline: run.deadline,
            transitions_count: run.transitions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_status_vocabulary() {
        assert_eq!(JobStatus::from_external("New"), JobStatus::Queued);
        assert_eq!(JobStatus::from_external("Active"), JobStatus::Running);
        assert_eq!(JobStatus::from_external("Completing"), JobStatus::Finalizing);
        assert_eq!(JobStatus::from_external("Complete"), JobStatus::Succeeded);
        assert_eq!(JobStatus::from_external("failed"), JobStatus::Failed);
        assert_eq!(JobStatus::from_external("RUNNING"), JobStatus::Running);
    }

    #[test]
    fn test_unknown_status_is_pending() {
        let status = JobStatus::from_external("PAUSED");
        assert_eq!(status, JobStatus::Unrecognized("PAUSED".to_string()));
        assert!(status.is_pending());
        assert!(!JobStatus::Succeeded.is_pending());
        assert!(!JobStatus::Failed.is_pending());
    }

    #[test]
    fn test_source_validation() {
        let source = SourceSpec::new("s3-equivalent://bucket/src")
            .with_prefix("2024/")
            .with_pattern(r".*\.json$");
        assert!(source.validate().is_ok());

        let bad_pattern = SourceSpec::new("s3-equivalent://bucket/src").with_pattern("(unclosed");
        assert!(matches!(
            bad_pattern.validate(),
            Err(WorkflowError::InvalidRequest { .. })
        ));

        assert!(SourceSpec::new("  ").validate().is_err());
    }

    #[test]
    fn test_new_run_deadline() {
        let now = Utc::now();
        let run = WorkflowRun::new(
            SourceSpec::new("s3-equivalent://bucket/src"),
            now,
            std::time::Duration::from_secs(90),
        );
        assert_eq!(run.phase, Phase::Start);
        assert_eq!(run.deadline, now + Duration::seconds(90));
        assert!(run.job_id.is_none());
        assert!(run.continuation_token.is_none());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&Phase::BuildManifest).unwrap();
        assert_eq!(json, "\"BUILD_MANIFEST\"");
        assert!(Phase::Failed.is_terminal());
        assert!(Phase::Polling.is_suspended());
        assert!(!Phase::LaunchJob.is_suspended());
    }
}
