// Property-Based Testing for the workflow state machine
// Feeds arbitrary job status sequences through a run and checks the pipeline invariants

use chrono::Utc;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::time::Duration;

use etl_orchestrator::workflow::{
    Action, ContinuationToken, FailureKind, JobId, JobStatus, ManifestRef, NotificationEvent,
    Outcome, Phase, RetryPolicy, SourceSpec, StatusReport, UpstreamOperation, WorkflowEvent,
    WorkflowMachine, WorkflowRun,
};

/// One answer from the status endpoint while the job is still in flight
#[derive(Debug, Clone, Arbitrary)]
enum PendingAnswer {
    Queued,
    Running,
    Finalizing,
    Unrecognized(#[proptest(strategy = "\"X_[A-Z]{3,10}\"")] String),
    /// Transport failure; consecutive ones are capped below the retry limit
    Unreachable,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Verdict {
    Succeeded,
    Failed,
}

fn status_event(answer: &PendingAnswer) -> WorkflowEvent {
    let raw = match answer {
        PendingAnswer::Queued => "QUEUED",
        PendingAnswer::Running => "RUNNING",
        PendingAnswer::Finalizing => "FINALIZING",
        PendingAnswer::Unrecognized(raw) => raw.as_str(),
        PendingAnswer::Unreachable => {
            return WorkflowEvent::UpstreamUnavailable {
                operation: UpstreamOperation::StatusPoll,
                error: "connection reset".to_string(),
            }
        }
    };
    WorkflowEvent::StatusReported(StatusReport::new(JobStatus::from_external(raw)))
}

/// Drop runs of transport failures longer than the retry budget allows
fn within_retry_budget(answers: Vec<PendingAnswer>, policy: RetryPolicy) -> Vec<PendingAnswer> {
    let mut consecutive = 0;
    answers
        .into_iter()
        .filter(|answer| match answer {
            PendingAnswer::Unreachable if consecutive >= policy.max_upstream_retries => false,
            PendingAnswer::Unreachable => {
                consecutive += 1;
                true
            }
            _ => {
                consecutive = 0;
                true
            }
        })
        .collect()
}

struct Trace {
    machine: WorkflowMachine,
    notifications: Vec<NotificationEvent>,
    phases: Vec<Phase>,
}

impl Trace {
    fn new() -> Self {
        let run = WorkflowRun::new(
            SourceSpec::new("s3-equivalent://bucket/src"),
            Utc::now(),
            Duration::from_secs(3600),
        );
        Self {
            machine: WorkflowMachine::new(run, RetryPolicy::default()),
            notifications: Vec::new(),
            phases: Vec::new(),
        }
    }

    fn feed(&mut self, event: WorkflowEvent) {
        let transition = self.machine.handle_event(event, Utc::now()).unwrap();
        self.phases.push(transition.to);
        self.notifications
            .extend(transition.actions.iter().filter_map(|action| match action {
                Action::Notify(notification) => Some(notification.event),
                _ => None,
            }));
    }

    /// Follow the happy path up to the first status poll
    fn launch(&mut self) {
        let token = ContinuationToken("T-prop".to_string());
        self.feed(WorkflowEvent::Proceed);
        self.feed(WorkflowEvent::Proceed);
        self.feed(WorkflowEvent::ManifestRequested {
            token: token.clone(),
        });
        self.feed(WorkflowEvent::ManifestReady {
            token,
            manifest: ManifestRef::new("s3-equivalent://runtime/manifest.csv", "abc"),
        });
        self.feed(WorkflowEvent::JobLaunched {
            job_id: JobId("job-prop".to_string()),
        });
    }

    /// Feed the remaining events the orchestrator would raise after a SUCCEEDED poll
    fn finish_ingestion(&mut self) {
        self.feed(WorkflowEvent::FinalStatusRead(None));
        self.feed(WorkflowEvent::IngestionHandedOff);
        self.feed(WorkflowEvent::Proceed);
        self.feed(WorkflowEvent::Proceed);
    }
}

fn run_scenario(answers: &[PendingAnswer], verdict: Verdict) -> Trace {
    let mut trace = Trace::new();
    trace.launch();

    for answer in answers {
        trace.feed(status_event(answer));
        assert_eq!(trace.machine.phase(), Phase::Polling);
        assert_eq!(
            trace.machine.run().job_id,
            Some(JobId("job-prop".to_string()))
        );
    }

    match verdict {
        Verdict::Succeeded => {
            trace.feed(status_event_raw("SUCCEEDED"));
            trace.finish_ingestion();
        }
        Verdict::Failed => trace.feed(status_event_raw("FAILED")),
    }
    trace
}

fn status_event_raw(raw: &str) -> WorkflowEvent {
    WorkflowEvent::StatusReported(StatusReport::new(JobStatus::from_external(raw)))
}

fn answers_strategy() -> impl Strategy<Value = Vec<PendingAnswer>> {
    prop::collection::vec(any::<PendingAnswer>(), 0..40)
        .prop_map(|answers| within_retry_budget(answers, RetryPolicy::default()))
}

#[cfg(test)]
mod property_tests {
    use super::*;

    #[test]
    fn prop_pending_statuses_never_leave_polling() {
        let mut runner = proptest::test_runner::TestRunner::default();

        runner
            .run(&(answers_strategy(), any::<Verdict>()), |(answers, verdict)| {
                let trace = run_scenario(&answers, verdict);

                let terminal = trace.machine.phase();
                prop_assert!(terminal.is_terminal());
                prop_assert_eq!(
                    trace.machine.run().job_id.clone(),
                    Some(JobId("job-prop".to_string())),
                    "job id changed after launch"
                );

                // Phases never move backwards
                let ordinals: Vec<u8> = trace.phases.iter().map(|phase| phase.ordinal()).collect();
                prop_assert!(
                    ordinals.windows(2).all(|pair| pair[0] <= pair[1]),
                    "phase order regressed: {:?}",
                    trace.phases
                );
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn prop_success_reaches_done_exactly_once() {
        let mut runner = proptest::test_runner::TestRunner::default();

        runner
            .run(&answers_strategy(), |answers| {
                let trace = run_scenario(&answers, Verdict::Succeeded);

                prop_assert_eq!(trace.machine.phase(), Phase::Done);
                prop_assert_eq!(
                    trace.phases.iter().filter(|phase| **phase == Phase::Done).count(),
                    1
                );
                prop_assert_eq!(
                    trace.notifications,
                    vec![
                        NotificationEvent::WorkflowStart,
                        NotificationEvent::ConversionStart,
                        NotificationEvent::ConversionEnd,
                        NotificationEvent::IngestionStart,
                        NotificationEvent::IngestionEnd,
                        NotificationEvent::WorkflowEnd,
                    ]
                );

                let result = trace.machine.run().terminal_result.clone().unwrap();
                prop_assert_eq!(result.outcome, Outcome::Success);

                let polls = answers.len() as u32 + 1;
                prop_assert_eq!(trace.machine.run().poll_attempts, polls);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn prop_job_failure_skips_ingestion() {
        let mut runner = proptest::test_runner::TestRunner::default();

        runner
            .run(&answers_strategy(), |answers| {
                let trace = run_scenario(&answers, Verdict::Failed);

                prop_assert_eq!(trace.machine.phase(), Phase::Failed);
                prop_assert!(!trace
                    .notifications
                    .iter()
                    .any(|event| event.is_ingestion()));
                prop_assert_eq!(
                    trace.notifications.last().copied(),
                    Some(NotificationEvent::WorkflowFailed)
                );

                let result = trace.machine.run().terminal_result.clone().unwrap();
                prop_assert_eq!(result.outcome, Outcome::Failure);
                prop_assert_eq!(result.kind, Some(FailureKind::JobFailed));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn prop_terminal_runs_reject_every_event() {
        let mut runner = proptest::test_runner::TestRunner::default();

        runner
            .run(
                &(answers_strategy(), any::<Verdict>(), any::<PendingAnswer>()),
                |(answers, verdict, late)| {
                    let mut trace = run_scenario(&answers, verdict);
                    let before = trace.machine.run().clone();

                    prop_assert!(trace
                        .machine
                        .handle_event(status_event(&late), Utc::now())
                        .is_err());
                    prop_assert!(trace
                        .machine
                        .handle_event(WorkflowEvent::Cancel, Utc::now())
                        .is_err());
                    prop_assert_eq!(trace.machine.run().phase, before.phase);
                    prop_assert_eq!(
                        trace.machine.run().transitions.len(),
                        before.transitions.len()
                    );
                    Ok(())
                },
            )
            .unwrap();
    }
}
