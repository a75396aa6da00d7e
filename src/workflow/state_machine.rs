use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::error::WorkflowError;
use super::notification::{Notification, NotificationEvent};
use super::persistence::prune_transition_history;
use super::types::{
    ContinuationToken, FailureCause, JobId, JobStatus, ManifestRef, Phase, RunStatusReport,
    StatusReport, TerminalResult, TransitionRecord, WorkflowRun,
};

/// Upstream call whose transport failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamOperation {
    ManifestRequest,
    JobLaunch,
    StatusPoll,
    IngestionHandoff,
}

impl UpstreamOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamOperation::ManifestRequest => "manifest request",
            UpstreamOperation::JobLaunch => "job launch",
            UpstreamOperation::StatusPoll => "status poll",
            UpstreamOperation::IngestionHandoff => "ingestion hand-off",
        }
    }

    /// Phase in which this operation is issued
    fn phase(self) -> Phase {
        match self {
            UpstreamOperation::ManifestRequest => Phase::BuildManifest,
            UpstreamOperation::JobLaunch => Phase::LaunchJob,
            UpstreamOperation::StatusPoll => Phase::Polling,
            UpstreamOperation::IngestionHandoff => Phase::StartIngestion,
        }
    }
}

/// Inputs that drive the workflow state machine
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// Unconditional successor of the current phase
    Proceed,
    ManifestRequested { token: ContinuationToken },
    ManifestReady {
        token: ContinuationToken,
        manifest: ManifestRef,
    },
    JobLaunched { job_id: JobId },
    StatusReported(StatusReport),
    /// Audit read after conversion; `None` when the poller could not be reached
    FinalStatusRead(Option<StatusReport>),
    IngestionHandedOff,
    UpstreamUnavailable {
        operation: UpstreamOperation,
        error: String,
    },
    Cancel,
    DeadlineExceeded,
    Fail(FailureCause),
}

impl WorkflowEvent {
    pub fn label(&self) -> String {
        match self {
            WorkflowEvent::Proceed => "proceed".to_string(),
            WorkflowEvent::ManifestRequested { .. } => "manifest_requested".to_string(),
            WorkflowEvent::ManifestReady { .. } => "manifest_ready".to_string(),
            WorkflowEvent::JobLaunched { .. } => "job_launched".to_string(),
            WorkflowEvent::StatusReported(report) => format!("status_reported:{}", report.status),
            WorkflowEvent::FinalStatusRead(_) => "final_status_read".to_string(),
            WorkflowEvent::IngestionHandedOff => "ingestion_handed_off".to_string(),
            WorkflowEvent::UpstreamUnavailable { operation, .. } => {
                format!("upstream_unavailable:{}", operation.as_str())
            }
            WorkflowEvent::Cancel => "cancel".to_string(),
            WorkflowEvent::DeadlineExceeded => "deadline_exceeded".to_string(),
            WorkflowEvent::Fail(_) => "fail".to_string(),
        }
    }
}

/// Side effects the orchestrator performs after a transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Notify(Notification),
    RequestManifest,
    LaunchJob,
    /// Suspend for one poll interval
    Wait,
    PollStatus,
    AuditStatus,
    HandOffIngestion,
    /// Feed `WorkflowEvent::Proceed` back into the machine
    Advance,
    Archive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Transport failures tolerated per upstream operation before the run fails
    pub max_upstream_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_upstream_retries: 3,
        }
    }
}

/// Explicit transition table for one workflow run
///
/// `handle_event` maps `(phase, event)` to the next phase plus the actions the caller
/// must perform. The machine performs no I/O itself, so a run can be rebuilt from its
/// persisted fields alone and resumed with `entry_actions`.
#[derive(Debug, Clone)]
pub struct WorkflowMachine {
    run: WorkflowRun,
    policy: RetryPolicy,
}

impl WorkflowMachine {
    pub fn new(run: WorkflowRun, policy: RetryPolicy) -> Self {
        Self { run, policy }
    }

    pub fn run(&self) -> &WorkflowRun {
        &self.run
    }

    pub fn into_run(self) -> WorkflowRun {
        self.run
    }

    pub fn phase(&self) -> Phase {
        self.run.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.run.phase.is_terminal()
    }

    pub fn status_report(&self) -> RunStatusReport {
        RunStatusReport::from(&self.run)
    }

    /// Keep only the newest `max_entries` transition records
    pub fn prune_history(&mut self, max_entries: usize) {
        prune_transition_history(&mut self.run, max_entries);
    }

    /// Actions owed on entering (or resuming in) the current phase
    pub fn entry_actions(&self) -> Vec<Action> {
        match self.run.phase {
            Phase::Start | Phase::NotifyStart | Phase::EndIngestion | Phase::NotifyEnd => {
                vec![Action::Advance]
            }
            Phase::BuildManifest if self.run.continuation_token.is_none() => {
                vec![Action::RequestManifest]
            }
            Phase::BuildManifest => vec![],
            Phase::LaunchJob => vec![Action::LaunchJob],
            Phase::Polling => vec![Action::Wait, Action::PollStatus],
            Phase::CompleteConversion => vec![Action::AuditStatus],
            Phase::StartIngestion => vec![Action::HandOffIngestion],
            Phase::Done | Phase::Failed => vec![],
        }
    }

    /// Apply one event at `now`
    pub fn handle_event(
        &mut self,
        event: WorkflowEvent,
        now: DateTime<Utc>,
    ) -> Result<Transition, WorkflowError> {
        let from = self.run.phase;
        if from.is_terminal() {
            return Err(WorkflowError::RunTerminated {
                run_id: self.run.run_id.clone(),
                phase: from,
            });
        }

        let label = event.label();
        let (to, mut actions) = match (from, event) {
            // Fatal paths, valid from any live phase
            (_, WorkflowEvent::DeadlineExceeded) => self.fail(FailureCause::timeout(), now),
            (_, WorkflowEvent::Fail(cause)) => self.fail(cause, now),
            (phase, WorkflowEvent::Cancel) if phase.is_suspended() => {
                self.fail(FailureCause::cancelled(), now)
            }

            (Phase::Start, WorkflowEvent::Proceed) => (
                Phase::NotifyStart,
                vec![self.notify(NotificationEvent::WorkflowStart)],
            ),

            (Phase::NotifyStart, WorkflowEvent::Proceed) => (
                Phase::BuildManifest,
                vec![self.notify(NotificationEvent::ConversionStart)],
            ),

            (Phase::BuildManifest, WorkflowEvent::ManifestRequested { token })
                if self.run.continuation_token.is_none() =>
            {
                info!(
                    run_id = %self.run.run_id,
                    token = %token,
                    "Manifest requested, awaiting callback"
                );
                self.run.continuation_token = Some(token);
                self.run.upstream_failures = 0;
                (Phase::BuildManifest, vec![])
            }

            (Phase::BuildManifest, WorkflowEvent::ManifestReady { token, manifest }) => {
                match &self.run.continuation_token {
                    Some(expected) if *expected == token => {
                        self.run.manifest_ref = Some(manifest);
                        self.run.continuation_token = None;
                        (Phase::LaunchJob, vec![])
                    }
                    Some(_) => {
                        return Err(WorkflowError::Protocol {
                            reason: format!(
                                "continuation token {} does not match the pending manifest request",
                                token
                            ),
                        })
                    }
                    None => {
                        return Err(WorkflowError::Protocol {
                            reason: format!(
                                "continuation token {} received before the manifest request was acknowledged",
                                token
                            ),
                        })
                    }
                }
            }

            (phase, WorkflowEvent::ManifestReady { token, .. }) => {
                return Err(WorkflowError::Protocol {
                    reason: format!(
                        "manifest callback with token {} is out of order in phase {}",
                        token, phase
                    ),
                })
            }

            (Phase::LaunchJob, WorkflowEvent::JobLaunched { job_id }) => {
                info!(run_id = %self.run.run_id, job_id = %job_id, "Batch job launched");
                self.run.job_id = Some(job_id);
                self.run.upstream_failures = 0;
                self.run.poll_attempts = 0;
                (Phase::Polling, vec![])
            }

            (Phase::Polling, WorkflowEvent::StatusReported(report)) => {
                self.run.poll_attempts += 1;
                self.run.upstream_failures = 0;
                let status = report.status.clone();
                let detail = report.detail.clone();
                self.run.last_status = Some(report);

                match status {
                    JobStatus::Succeeded => (
                        Phase::CompleteConversion,
                        vec![self.notify(NotificationEvent::ConversionEnd)],
                    ),
                    JobStatus::Failed => self.fail(FailureCause::job_failed(detail), now),
                    JobStatus::Unrecognized(raw) => {
                        warn!(
                            run_id = %self.run.run_id,
                            status = %raw,
                            "Unrecognized job status, treating as pending"
                        );
                        (Phase::Polling, vec![])
                    }
                    JobStatus::Queued | JobStatus::Running | JobStatus::Finalizing => {
                        (Phase::Polling, vec![])
                    }
                }
            }

            (Phase::CompleteConversion, WorkflowEvent::FinalStatusRead(report)) => {
                if let Some(report) = report {
                    self.run.last_status = Some(report);
                }
                (
                    Phase::StartIngestion,
                    vec![self.notify(NotificationEvent::IngestionStart)],
                )
            }

            (Phase::StartIngestion, WorkflowEvent::IngestionHandedOff) => {
                self.run.upstream_failures = 0;
                (
                    Phase::EndIngestion,
                    vec![self.notify(NotificationEvent::IngestionEnd)],
                )
            }

            (Phase::EndIngestion, WorkflowEvent::Proceed) => {
                (Phase::NotifyEnd, vec![])
            }

            (Phase::NotifyEnd, WorkflowEvent::Proceed) => {
                self.run.terminal_result = Some(TerminalResult::success(now));
                (
                    Phase::Done,
                    vec![self.notify_terminal(NotificationEvent::WorkflowEnd), Action::Archive],
                )
            }

            (phase, WorkflowEvent::UpstreamUnavailable { operation, error })
                if operation.phase() == phase =>
            {
                self.run.upstream_failures += 1;
                if phase == Phase::Polling {
                    self.run.poll_attempts += 1;
                }

                if self.run.upstream_failures > self.policy.max_upstream_retries {
                    let err = WorkflowError::UpstreamUnavailable {
                        operation: operation.as_str().to_string(),
                        attempts: self.run.upstream_failures,
                        last_error: error,
                    };
                    error!(run_id = %self.run.run_id, error = %err, "Upstream retries exhausted");
                    let cause = err
                        .failure_cause()
                        .unwrap_or_else(|| FailureCause::upstream_unavailable(operation.as_str()));
                    self.fail(cause, now)
                } else {
                    warn!(
                        run_id = %self.run.run_id,
                        operation = operation.as_str(),
                        attempt = self.run.upstream_failures,
                        max_retries = self.policy.max_upstream_retries,
                        error = %error,
                        "Upstream unavailable, retrying after poll interval"
                    );
                    // Polling already waits on entry; other phases retry after one interval
                    let retry = if phase == Phase::Polling {
                        vec![]
                    } else {
                        vec![Action::Wait]
                    };
                    (phase, retry)
                }
            }

            (phase, event) => {
                error!(
                    run_id = %self.run.run_id,
                    phase = %phase,
                    event = %event.label(),
                    "Invalid workflow transition"
                );
                return Err(WorkflowError::InvalidTransition {
                    phase,
                    event: event.label(),
                });
            }
        };

        debug_assert!(
            to.ordinal() >= from.ordinal(),
            "workflow phases only move forward"
        );

        self.record_transition(from, to, label, now);
        if !to.is_terminal() {
            actions.extend(self.entry_actions());
        }

        Ok(Transition { from, to, actions })
    }

    fn fail(&mut self, cause: FailureCause, now: DateTime<Utc>) -> (Phase, Vec<Action>) {
        error!(
            run_id = %self.run.run_id,
            phase = %self.run.phase,
            cause = %cause.cause,
            context = ?cause.context,
            "Workflow run failed"
        );
        self.run.continuation_token = None;
        self.run.terminal_result = Some(TerminalResult::failure(cause, now));
        (
            Phase::Failed,
            vec![
                self.notify_terminal(NotificationEvent::WorkflowFailed),
                Action::Archive,
            ],
        )
    }

    fn notify(&self, event: NotificationEvent) -> Action {
        Action::Notify(Notification::for_run(event, &self.run))
    }

    /// Terminal notifications are built after the phase is set so the payload is final
    fn notify_terminal(&self, event: NotificationEvent) -> Action {
        let mut run = self.run.clone();
        run.phase = match event {
            NotificationEvent::WorkflowEnd => Phase::Done,
            _ => Phase::Failed,
        };
        Action::Notify(Notification::for_run(event, &run))
    }

    fn record_transition(&mut self, from: Phase, to: Phase, event: String, now: DateTime<Utc>) {
        info!(
            run_id = %self.run.run_id,
            from_phase = %from,
            to_phase = %to,
            event = %event,
            poll_attempts = self.run.poll_attempts,
            "Workflow state transition"
        );

        self.run.transitions.push(TransitionRecord {
            from,
            to,
            event,
            at: now,
        });
        self.run.phase = to;
        self.run.updated_at = now;
    }
}
