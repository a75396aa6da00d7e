use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use super::collaborators::{
    IngestionHandoff, JobLauncher, LaunchRequest, ManifestGateway, ManifestRequest, NoopIngestion,
    Notifier, StatusPoller,
};
use super::error::WorkflowError;
use super::notification::Notification;
use super::persistence::{CheckpointReason, RunStore};
use super::state_machine::{
    Action, RetryPolicy, Transition, UpstreamOperation, WorkflowEvent, WorkflowMachine,
};
use super::types::{
    ContinuationToken, FailureCause, HandlerRef, ManifestRef, Outcome, PendingOperation, Phase,
    RunId, RunStatusReport, SourceSpec, WorkflowRun,
};
use crate::observability::{create_run_span, orchestrator_metrics, OperationTimer};

/// Runtime knobs for the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    /// Wall-clock ceiling for a whole run
    pub workflow_timeout: Duration,
    pub max_upstream_retries: u32,
    pub notify_timeout: Duration,
    pub handler: HandlerRef,
    pub max_transition_history: usize,
}

impl OrchestratorSettings {
    pub fn new(workflow_timeout: Duration) -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            workflow_timeout,
            max_upstream_retries: RetryPolicy::default().max_upstream_retries,
            notify_timeout: Duration::from_secs(10),
            handler: HandlerRef("rdf-conversion-handler".to_string()),
            max_transition_history: 500,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_upstream_retries(mut self, retries: u32) -> Self {
        self.max_upstream_retries = retries;
        self
    }

    pub fn with_notify_timeout(mut self, notify_timeout: Duration) -> Self {
        self.notify_timeout = notify_timeout;
        self
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = HandlerRef(handler.into());
        self
    }

    pub fn with_max_transition_history(mut self, max_entries: usize) -> Self {
        self.max_transition_history = max_entries;
        self
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_upstream_retries: self.max_upstream_retries,
        }
    }
}

/// External systems a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub manifest_gateway: Arc<dyn ManifestGateway>,
    pub job_launcher: Arc<dyn JobLauncher>,
    pub status_poller: Arc<dyn StatusPoller>,
    pub notifier: Arc<dyn Notifier>,
    pub ingestion: Arc<dyn IngestionHandoff>,
}

impl Collaborators {
    pub fn new(
        manifest_gateway: Arc<dyn ManifestGateway>,
        job_launcher: Arc<dyn JobLauncher>,
        status_poller: Arc<dyn StatusPoller>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            manifest_gateway,
            job_launcher,
            status_poller,
            notifier,
            ingestion: Arc::new(NoopIngestion),
        }
    }

    pub fn with_ingestion(mut self, ingestion: Arc<dyn IngestionHandoff>) -> Self {
        self.ingestion = ingestion;
        self
    }
}

/// In-memory handle of one active run
struct RunSlot {
    run_id: RunId,
    machine: Mutex<WorkflowMachine>,
    /// Latest committed state, readable without taking the run lock
    snapshot: watch::Sender<WorkflowRun>,
    /// Flips to true once the terminal run has been archived
    archived: watch::Sender<bool>,
    deadline: Instant,
    driver: Mutex<Option<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl RunSlot {
    fn new(machine: WorkflowMachine) -> Self {
        let run = machine.run().clone();
        let remaining = (run.deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let (snapshot, _) = watch::channel(run.clone());
        let (archived, _) = watch::channel(false);

        Self {
            run_id: run.run_id,
            machine: Mutex::new(machine),
            snapshot,
            archived,
            deadline: Instant::now() + remaining,
            driver: Mutex::new(None),
            watchdog: Mutex::new(None),
        }
    }

    async fn abort_driver(&self) {
        if let Some(handle) = self.driver.lock().await.take() {
            handle.abort();
        }
    }
}

struct Inner {
    settings: OrchestratorSettings,
    collaborators: Collaborators,
    store: Arc<dyn RunStore>,
    runs: RwLock<HashMap<RunId, Arc<RunSlot>>>,
}

/// Drives workflow runs from START to a terminal phase
///
/// Each run owns a lock, a driver task executing the actions its transitions produce
/// and a watchdog enforcing the run deadline. Runs share nothing but the store and the
/// collaborators, so any number of them progress in parallel. Every applied transition
/// is persisted before its actions run, which lets `recover` pick a run up again after
/// a restart.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    inner: Arc<Inner>,
}

impl WorkflowOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        collaborators: Collaborators,
        store: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                collaborators,
                store,
                runs: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Start a new run for `source`
    pub async fn start(&self, source: SourceSpec) -> Result<RunId, WorkflowError> {
        source.validate()?;

        let run = WorkflowRun::new(source, Utc::now(), self.inner.settings.workflow_timeout);
        let run_id = run.run_id.clone();

        info!(
            run_id = %run_id,
            location = %run.source.location,
            prefix = ?run.source.prefix,
            pattern = ?run.source.pattern,
            deadline = %run.deadline,
            "Starting workflow run"
        );

        self.inner.persist(&run, CheckpointReason::RunCreated).await;
        orchestrator_metrics().record_run_started();
        self.inner.activate(run).await;

        Ok(run_id)
    }

    /// Deliver the manifest-ready callback for a run suspended in BUILD_MANIFEST
    ///
    /// A token that does not match the pending request aborts the run; the rejection
    /// is still returned to the caller.
    pub async fn resume(
        &self,
        run_id: &RunId,
        token: ContinuationToken,
        manifest: ManifestRef,
    ) -> Result<(), WorkflowError> {
        let slot = match self.inner.slot(run_id).await {
            Some(slot) => slot,
            None => return Err(self.inner.missing_run_error(run_id).await),
        };

        wait_for_acknowledgement(&mut slot.snapshot.subscribe()).await;

        let mut machine = slot.machine.lock().await;
        let event = WorkflowEvent::ManifestReady { token, manifest };

        match self.inner.apply(&slot, &mut machine, event).await {
            Ok(transition) => {
                drop(machine);
                info!(run_id = %run_id, "Manifest ready, resuming run");
                self.inner.spawn_driver(&slot, transition.actions).await;
                Ok(())
            }
            Err(err @ WorkflowError::RunTerminated { .. }) => Err(err),
            Err(err) => {
                orchestrator_metrics().record_callback_rejected();
                warn!(run_id = %run_id, error = %err, "Rejected manifest callback");

                let cause = err
                    .failure_cause()
                    .unwrap_or_else(|| FailureCause::protocol(err.to_string()));
                let failed = self
                    .inner
                    .apply(&slot, &mut machine, WorkflowEvent::Fail(cause))
                    .await;
                drop(machine);

                if let Ok(transition) = failed {
                    slot.abort_driver().await;
                    self.inner.drive(&slot, transition.actions).await;
                }
                Err(err)
            }
        }
    }

    /// Resume whichever run is waiting on `token`
    pub async fn resume_by_token(
        &self,
        token: ContinuationToken,
        manifest: ManifestRef,
    ) -> Result<RunId, WorkflowError> {
        match self.inner.store.resolve_pending(&token).await? {
            Some(pending) => {
                self.resume(&pending.run_id, token, manifest).await?;
                Ok(pending.run_id)
            }
            None => {
                orchestrator_metrics().record_callback_rejected();
                warn!(token = %token, "Manifest callback for unknown continuation token");
                Err(WorkflowError::Protocol {
                    reason: format!("unknown continuation token {}", token),
                })
            }
        }
    }

    /// Cancel a run that is waiting on its manifest or polling its job
    ///
    /// The external job, if any, keeps running.
    pub async fn cancel(&self, run_id: &RunId) -> Result<(), WorkflowError> {
        let slot = match self.inner.slot(run_id).await {
            Some(slot) => slot,
            None => return Err(self.inner.missing_run_error(run_id).await),
        };

        let mut machine = slot.machine.lock().await;
        let transition = self
            .inner
            .apply(&slot, &mut machine, WorkflowEvent::Cancel)
            .await?;
        drop(machine);

        info!(run_id = %run_id, "Workflow run cancelled");
        slot.abort_driver().await;
        self.inner.drive(&slot, transition.actions).await;
        Ok(())
    }

    /// Current view of an active or archived run
    pub async fn status(&self, run_id: &RunId) -> Result<RunStatusReport, WorkflowError> {
        if let Some(slot) = self.inner.slot(run_id).await {
            let report = RunStatusReport::from(&*slot.snapshot.borrow());
            return Ok(report);
        }

        match self.inner.store.load(run_id).await? {
            Some(run) => Ok(RunStatusReport::from(&run)),
            None => Err(WorkflowError::RunNotFound(run_id.clone())),
        }
    }

    pub async fn active_runs(&self) -> Vec<RunStatusReport> {
        let runs = self.inner.runs.read().await;
        let mut reports: Vec<RunStatusReport> = runs
            .values()
            .map(|slot| RunStatusReport::from(&*slot.snapshot.borrow()))
            .collect();
        reports.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        reports
    }

    /// Reload every active run from the store and continue it where it stopped
    pub async fn recover(&self) -> Result<usize, WorkflowError> {
        let runs = self.inner.store.list_active().await?;
        let mut recovered = 0;

        for run in runs {
            if self.inner.runs.read().await.contains_key(&run.run_id) {
                continue;
            }

            if run.is_terminal() {
                // Finished but never archived
                info!(run_id = %run.run_id, phase = %run.phase, "Archiving finished run found during recovery");
                if let Err(e) = self.inner.store.archive(&run).await {
                    orchestrator_metrics().record_persistence_failure();
                    error!(run_id = %run.run_id, error = %e, "Failed to archive recovered run");
                }
                continue;
            }

            if let Some(token) = &run.continuation_token {
                let pending = PendingOperation {
                    token: token.clone(),
                    run_id: run.run_id.clone(),
                    requested_at: run.updated_at,
                };
                if let Err(e) = self.inner.store.register_pending(&pending).await {
                    orchestrator_metrics().record_persistence_failure();
                    error!(run_id = %run.run_id, error = %e, "Failed to restore pending manifest request");
                }
            }

            info!(
                run_id = %run.run_id,
                phase = %run.phase,
                poll_attempts = run.poll_attempts,
                deadline = %run.deadline,
                "Recovering workflow run"
            );
            self.inner.persist(&run, CheckpointReason::Recovered).await;
            self.inner.activate(run).await;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "Recovered active workflow runs");
        }
        Ok(recovered)
    }

    /// Wait until a run is terminal and archived, then return its final state
    pub async fn wait_for_terminal(&self, run_id: &RunId) -> Result<WorkflowRun, WorkflowError> {
        if let Some(slot) = self.inner.slot(run_id).await {
            let mut archived = slot.archived.subscribe();
            loop {
                let done = *archived.borrow_and_update();
                if done || archived.changed().await.is_err() {
                    break;
                }
            }
            let run = slot.snapshot.borrow().clone();
            return Ok(run);
        }

        match self.inner.store.load(run_id).await? {
            Some(run) if run.is_terminal() => Ok(run),
            _ => Err(WorkflowError::RunNotFound(run_id.clone())),
        }
    }

    /// Stop every driver and watchdog; runs stay persisted for `recover`
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<RunSlot>> = self.inner.runs.write().await.drain().map(|(_, s)| s).collect();
        for slot in &slots {
            slot.abort_driver().await;
            if let Some(handle) = slot.watchdog.lock().await.take() {
                handle.abort();
            }
        }
        info!(suspended_runs = slots.len(), "Orchestrator stopped");
    }
}

impl Inner {
    async fn slot(&self, run_id: &RunId) -> Option<Arc<RunSlot>> {
        self.runs.read().await.get(run_id).cloned()
    }

    async fn missing_run_error(&self, run_id: &RunId) -> WorkflowError {
        match self.store.load(run_id).await {
            Ok(Some(run)) if run.is_terminal() => WorkflowError::RunTerminated {
                run_id: run_id.clone(),
                phase: run.phase,
            },
            _ => WorkflowError::RunNotFound(run_id.clone()),
        }
    }

    /// Register a run in memory and start its watchdog and driver
    async fn activate(self: &Arc<Self>, run: WorkflowRun) -> Arc<RunSlot> {
        let machine = WorkflowMachine::new(run, self.settings.retry_policy());
        let actions = machine.entry_actions();
        let slot = Arc::new(RunSlot::new(machine));

        self.runs
            .write()
            .await
            .insert(slot.run_id.clone(), Arc::clone(&slot));
        self.spawn_watchdog(&slot).await;

        // An expired deadline is left to the watchdog
        if !actions.is_empty() && slot.deadline > Instant::now() {
            self.spawn_driver(&slot, actions).await;
        }
        slot
    }

    async fn spawn_driver(self: &Arc<Self>, slot: &Arc<RunSlot>, actions: Vec<Action>) {
        if actions.is_empty() {
            return;
        }
        let inner = Arc::clone(self);
        let task_slot = Arc::clone(slot);
        let span = create_run_span(slot.run_id.as_str());

        let handle = tokio::spawn(
            async move {
                inner.drive(&task_slot, actions).await;
            }
            .instrument(span),
        );
        *slot.driver.lock().await = Some(handle);
    }

    async fn spawn_watchdog(self: &Arc<Self>, slot: &Arc<RunSlot>) {
        let inner = Arc::clone(self);
        let task_slot = Arc::clone(slot);
        let mut snapshot = slot.snapshot.subscribe();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(task_slot.deadline) => {
                    inner.expire(&task_slot).await;
                }
                _ = wait_until_terminal(&mut snapshot) => {}
            }
        });
        *slot.watchdog.lock().await = Some(handle);
    }

    /// Force a run past its deadline into FAILED
    async fn expire(&self, slot: &Arc<RunSlot>) {
        slot.abort_driver().await;

        let mut machine = slot.machine.lock().await;
        if machine.is_terminal() {
            // The driver was stopped between the terminal transition and archiving
            drop(machine);
            self.archive(slot).await;
            return;
        }

        warn!(
            run_id = %slot.run_id,
            phase = %machine.phase(),
            "Workflow deadline reached"
        );
        let transition = self
            .apply(slot, &mut machine, WorkflowEvent::DeadlineExceeded)
            .await;
        drop(machine);

        if let Ok(transition) = transition {
            self.drive(slot, transition.actions).await;
        }
    }

    /// Execute actions in order until the queue drains or the run stops
    async fn drive(&self, slot: &Arc<RunSlot>, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Wait => tokio::time::sleep(self.settings.poll_interval).await,
                Action::Notify(notification) => self.notify(&notification).await,
                Action::Archive => self.archive(slot).await,
                action => {
                    // Collaborator calls run without the run lock so cancel and
                    // callbacks never queue behind a slow upstream
                    let run = {
                        let machine = slot.machine.lock().await;
                        if machine.is_terminal() {
                            debug!(run_id = %slot.run_id, "Run already terminal, driver stopping");
                            return;
                        }
                        machine.run().clone()
                    };

                    let Some(event) = self.perform(&action, &run).await else {
                        continue;
                    };

                    let mut machine = slot.machine.lock().await;
                    if changed_since(&run, machine.run()) {
                        debug!(
                            run_id = %slot.run_id,
                            phase = %machine.phase(),
                            event = %event.label(),
                            "Run moved on during collaborator call, dropping its result"
                        );
                        return;
                    }
                    let transition = self.apply_or_fail(slot, &mut machine, event).await;
                    queue.extend(transition);
                }
            }
        }
    }

    /// Run one collaborator call and translate its outcome into an event
    async fn perform(&self, action: &Action, run: &WorkflowRun) -> Option<WorkflowEvent> {
        let event = match action {
            Action::Advance => WorkflowEvent::Proceed,

            Action::RequestManifest => {
                let request = ManifestRequest {
                    run_id: run.run_id.clone(),
                    source: run.source.clone(),
                };
                let timer = OperationTimer::new("manifest_request");
                let result = self
                    .collaborators
                    .manifest_gateway
                    .request_manifest(&request)
                    .await;
                timer.finish();

                match result {
                    Ok(token) => WorkflowEvent::ManifestRequested { token },
                    Err(e) => upstream_failure(UpstreamOperation::ManifestRequest, e.to_string()),
                }
            }

            Action::LaunchJob => {
                let Some(manifest) = run.manifest_ref.clone() else {
                    return Some(WorkflowEvent::Fail(FailureCause::protocol(
                        "job launch requested before a manifest was recorded",
                    )));
                };
                let request = LaunchRequest {
                    run_id: run.run_id.clone(),
                    manifest,
                    handler: self.settings.handler.clone(),
                    client_request_token: format!("{}-launch", run.run_id),
                };
                let timer = OperationTimer::new("job_launch");
                let result = self.collaborators.job_launcher.launch(&request).await;
                timer.finish();

                match result {
                    Ok(job_id) => WorkflowEvent::JobLaunched { job_id },
                    Err(e) => upstream_failure(UpstreamOperation::JobLaunch, e.to_string()),
                }
            }

            Action::PollStatus => {
                let Some(job_id) = &run.job_id else {
                    return Some(WorkflowEvent::Fail(FailureCause::protocol(
                        "status poll requested without a job id",
                    )));
                };
                orchestrator_metrics().record_status_poll();
                let timer = OperationTimer::new("status_poll");
                let result = self.collaborators.status_poller.status(job_id).await;
                timer.finish();

                match result {
                    Ok(report) => {
                        debug!(
                            run_id = %run.run_id,
                            job_id = %job_id,
                            status = %report.status,
                            attempt = run.poll_attempts + 1,
                            "Job status polled"
                        );
                        WorkflowEvent::StatusReported(report)
                    }
                    Err(e) => upstream_failure(UpstreamOperation::StatusPoll, e.to_string()),
                }
            }

            Action::AuditStatus => {
                let report = match &run.job_id {
                    Some(job_id) => match self.collaborators.status_poller.status(job_id).await {
                        Ok(report) => Some(report),
                        Err(e) => {
                            warn!(
                                run_id = %run.run_id,
                                error = %e,
                                "Final status read failed, keeping last recorded status"
                            );
                            None
                        }
                    },
                    None => None,
                };
                WorkflowEvent::FinalStatusRead(report)
            }

            Action::HandOffIngestion => {
                let timer = OperationTimer::new("ingestion_handoff");
                let result = self.collaborators.ingestion.hand_off(run).await;
                timer.finish();

                match result {
                    Ok(()) => WorkflowEvent::IngestionHandedOff,
                    Err(e) => upstream_failure(UpstreamOperation::IngestionHandoff, e.to_string()),
                }
            }

            Action::Wait | Action::Notify(_) | Action::Archive => return None,
        };
        Some(event)
    }

    /// Apply an event, persist the result and publish the new snapshot
    async fn apply(
        &self,
        slot: &RunSlot,
        machine: &mut WorkflowMachine,
        event: WorkflowEvent,
    ) -> Result<Transition, WorkflowError> {
        let token_before = machine.run().continuation_token.clone();
        let transition = machine.handle_event(event, Utc::now())?;
        machine.prune_history(self.settings.max_transition_history);
        orchestrator_metrics().record_transition();

        let run = machine.run().clone();

        match (&token_before, &run.continuation_token) {
            (None, Some(token)) => {
                let pending = PendingOperation {
                    token: token.clone(),
                    run_id: run.run_id.clone(),
                    requested_at: run.updated_at,
                };
                if let Err(e) = self.store.register_pending(&pending).await {
                    orchestrator_metrics().record_persistence_failure();
                    error!(run_id = %run.run_id, error = %e, "Failed to register pending manifest request");
                }
            }
            (Some(token), None) => {
                if let Err(e) = self.store.remove_pending(token).await {
                    orchestrator_metrics().record_persistence_failure();
                    warn!(run_id = %run.run_id, error = %e, "Failed to remove pending manifest request");
                }
            }
            _ => {}
        }

        self.persist(&run, CheckpointReason::StateTransition).await;

        if transition.to.is_terminal() && !transition.from.is_terminal() {
            match run.terminal_result.as_ref().map(|r| r.outcome) {
                Some(Outcome::Success) => orchestrator_metrics().record_run_succeeded(),
                _ => orchestrator_metrics().record_run_failed(),
            }
        }

        slot.snapshot.send_replace(run);
        Ok(transition)
    }

    /// Apply an event raised by the run itself; errors end the run instead of escaping
    async fn apply_or_fail(
        &self,
        slot: &RunSlot,
        machine: &mut WorkflowMachine,
        event: WorkflowEvent,
    ) -> Vec<Action> {
        let err = match self.apply(slot, machine, event).await {
            Ok(transition) => return transition.actions,
            Err(WorkflowError::RunTerminated { .. }) => return Vec::new(),
            Err(err) => err,
        };

        error!(run_id = %slot.run_id, error = %err, "Workflow event rejected, failing run");
        let cause = err
            .failure_cause()
            .unwrap_or_else(|| FailureCause::protocol(err.to_string()));

        match self.apply(slot, machine, WorkflowEvent::Fail(cause)).await {
            Ok(transition) => transition.actions,
            Err(e) => {
                error!(run_id = %slot.run_id, error = %e, "Unable to fail run");
                Vec::new()
            }
        }
    }

    async fn persist(&self, run: &WorkflowRun, reason: CheckpointReason) {
        if let Err(e) = self.store.save(run, reason).await {
            orchestrator_metrics().record_persistence_failure();
            error!(
                run_id = %run.run_id,
                phase = %run.phase,
                error = %e,
                "Failed to persist workflow run"
            );
        }
    }

    /// Publish a notification; delivery problems never reach the run
    async fn notify(&self, notification: &Notification) {
        let publish = self.collaborators.notifier.publish(notification);
        match tokio::time::timeout(self.settings.notify_timeout, publish).await {
            Ok(Ok(())) => {
                orchestrator_metrics().record_notification_sent();
                debug!(event = notification.name(), "Notification published");
            }
            Ok(Err(e)) => {
                orchestrator_metrics().record_notification_failure();
                warn!(event = notification.name(), error = %e, "Notification failed");
            }
            Err(_) => {
                orchestrator_metrics().record_notification_failure();
                warn!(
                    event = notification.name(),
                    timeout_ms = self.settings.notify_timeout.as_millis() as u64,
                    "Notification timed out"
                );
            }
        }
    }

    /// Move a terminal run to the archive and drop it from memory
    async fn archive(&self, slot: &Arc<RunSlot>) {
        let run = slot.machine.lock().await.run().clone();
        if !run.is_terminal() {
            return;
        }

        if let Err(e) = self.store.archive(&run).await {
            orchestrator_metrics().record_persistence_failure();
            error!(run_id = %run.run_id, error = %e, "Failed to archive workflow run");
        }

        // The watchdog exits on its own once it sees the terminal snapshot
        self.runs.write().await.remove(&run.run_id);

        info!(
            run_id = %run.run_id,
            phase = %run.phase,
            outcome = ?run.terminal_result.as_ref().map(|r| r.outcome),
            detail = ?run.terminal_result.as_ref().map(|r| r.detail.as_str()),
            poll_attempts = run.poll_attempts,
            "Workflow run finished"
        );
        slot.archived.send_replace(true);
    }
}

fn upstream_failure(operation: UpstreamOperation, error: String) -> WorkflowEvent {
    orchestrator_metrics().record_upstream_error();
    warn!(operation = operation.as_str(), error = %error, "Upstream call failed");
    WorkflowEvent::UpstreamUnavailable { operation, error }
}

async fn wait_until_terminal(snapshot: &mut watch::Receiver<WorkflowRun>) {
    loop {
        let terminal = snapshot.borrow_and_update().phase.is_terminal();
        if terminal || snapshot.changed().await.is_err() {
            return;
        }
    }
}

/// Whether another transition was applied after `before` was taken
fn changed_since(before: &WorkflowRun, current: &WorkflowRun) -> bool {
    before.phase != current.phase
        || before.updated_at != current.updated_at
        || before.continuation_token != current.continuation_token
}

/// Hold a callback until the run's manifest request has been acknowledged
///
/// The gateway may deliver the callback before the driver has recorded the token it
/// returned. Waiting ends once a token is pending or the run leaves BUILD_MANIFEST.
async fn wait_for_acknowledgement(snapshot: &mut watch::Receiver<WorkflowRun>) {
    loop {
        let requesting = {
            let run = snapshot.borrow_and_update();
            run.phase == Phase::BuildManifest && run.continuation_token.is_none()
        };
        if !requesting || snapshot.changed().await.is_err() {
            return;
        }
    }
}
