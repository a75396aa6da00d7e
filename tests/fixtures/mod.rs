//! Scripted collaborators shared by the integration tests
//!
//! Each fake records what it was asked to do so tests can assert on call counts and
//! request contents, and replays a scripted sequence of answers.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etl_orchestrator::workflow::{
    Collaborators, ContinuationToken, InMemoryRunStore, IngestionHandoff, JobId, JobLauncher,
    JobStatus, LaunchRequest, ManifestGateway, ManifestRef, ManifestRequest, Notification,
    Notifier, NotifyError, OrchestratorSettings, RunStore, StatusPoller, StatusReport,
    TransportError, WorkflowOrchestrator, WorkflowRun,
};

pub const SOURCE: &str = "s3-equivalent://bucket/src";
pub const MANIFEST: &str = "s3-equivalent://runtime/manifest.csv";

pub fn manifest() -> ManifestRef {
    ManifestRef::new(MANIFEST, "abc")
}

pub fn report(status: &str) -> StatusReport {
    StatusReport {
        status: JobStatus::from_external(status),
        detail: None,
    }
}

/// Hands out `T-<run id>` tokens unless a fixed token is configured
#[derive(Default)]
pub struct ScriptedGateway {
    fixed_token: Option<String>,
    failures_remaining: Mutex<u32>,
    requests: Mutex<Vec<ManifestRequest>>,
}

impl ScriptedGateway {
    pub fn with_token(token: &str) -> Self {
        Self {
            fixed_token: Some(token.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures_remaining: Mutex::new(failures),
            ..Self::default()
        }
    }

    pub fn token_for(run: &WorkflowRun) -> ContinuationToken {
        ContinuationToken(format!("T-{}", run.run_id))
    }

    pub fn requests(&self) -> Vec<ManifestRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestGateway for ScriptedGateway {
    async fn request_manifest(
        &self,
        request: &ManifestRequest,
    ) -> Result<ContinuationToken, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let mut failures = self.failures_remaining.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(TransportError::Connection("gateway down".to_string()));
        }

        Ok(match &self.fixed_token {
            Some(token) => ContinuationToken(token.clone()),
            None => ContinuationToken(format!("T-{}", request.run_id)),
        })
    }
}

#[derive(Default)]
pub struct ScriptedLauncher {
    unavailable: bool,
    launches: Mutex<Vec<LaunchRequest>>,
}

impl ScriptedLauncher {
    /// Records every launch request and rejects each with a transport error
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}

#[async_trait]
impl JobLauncher for ScriptedLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<JobId, TransportError> {
        let mut launches = self.launches.lock().unwrap();
        launches.push(request.clone());
        if self.unavailable {
            return Err(TransportError::Connection("launcher unreachable".to_string()));
        }
        Ok(JobId(format!("job-{}", launches.len())))
    }
}

/// Replays scripted answers in order; the last one repeats forever
pub struct ScriptedPoller {
    script: Mutex<VecDeque<Result<StatusReport, TransportError>>>,
    calls: Mutex<usize>,
    delay: Duration,
}

impl ScriptedPoller {
    pub fn new(script: Vec<Result<StatusReport, TransportError>>) -> Self {
        assert!(!script.is_empty(), "a poller script needs at least one answer");
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Make every answer take `delay` to arrive
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn statuses(statuses: &[&str]) -> Self {
        Self::new(statuses.iter().map(|status| Ok(report(status))).collect())
    }

    pub fn unavailable() -> Self {
        Self::new(vec![Err(TransportError::Connection(
            "status endpoint unreachable".to_string(),
        ))])
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl StatusPoller for ScriptedPoller {
    async fn status(&self, _job_id: &JobId) -> Result<StatusReport, TransportError> {
        *self.calls.lock().unwrap() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(|| Ok(report("RUNNING")))
        } else {
            script.front().cloned().unwrap_or_else(|| Ok(report("RUNNING")))
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    failing: bool,
    published: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Records every notification but reports each one as undeliverable
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<Notification> {
        self.published.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|notification| notification.name())
            .collect()
    }

    /// Events published for one run, in order
    pub fn events_for(&self, run_id: &str) -> Vec<&'static str> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|notification| notification.payload["run_id"] == run_id)
            .map(|notification| notification.name())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.published.lock().unwrap().push(notification.clone());
        if self.failing {
            return Err(NotifyError::Unavailable("topic unreachable".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingIngestion {
    calls: Mutex<usize>,
}

impl RecordingIngestion {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl IngestionHandoff for RecordingIngestion {
    async fn hand_off(&self, _run: &WorkflowRun) -> Result<(), TransportError> {
        *self.calls.lock().unwrap() += 1;
        Ok(())
    }
}

/// One orchestrator wired to scripted collaborators
pub struct Harness {
    pub orchestrator: WorkflowOrchestrator,
    pub store: Arc<dyn RunStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub launcher: Arc<ScriptedLauncher>,
    pub poller: Arc<ScriptedPoller>,
    pub notifier: Arc<RecordingNotifier>,
    pub ingestion: Arc<RecordingIngestion>,
}

pub struct HarnessBuilder {
    settings: OrchestratorSettings,
    store: Arc<dyn RunStore>,
    gateway: ScriptedGateway,
    launcher: ScriptedLauncher,
    poller: ScriptedPoller,
    notifier: RecordingNotifier,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            settings: OrchestratorSettings::new(Duration::from_secs(3600))
                .with_poll_interval(Duration::from_secs(30)),
            store: Arc::new(InMemoryRunStore::new()),
            gateway: ScriptedGateway::default(),
            launcher: ScriptedLauncher::default(),
            poller: ScriptedPoller::statuses(&["SUCCEEDED"]),
            notifier: RecordingNotifier::default(),
        }
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = store;
        self
    }

    pub fn gateway(mut self, gateway: ScriptedGateway) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn launcher(mut self, launcher: ScriptedLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn poller(mut self, poller: ScriptedPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn build(self) -> Harness {
        let gateway = Arc::new(self.gateway);
        let launcher = Arc::new(self.launcher);
        let poller = Arc::new(self.poller);
        let notifier = Arc::new(self.notifier);
        let ingestion = Arc::new(RecordingIngestion::default());

        let collaborators = Collaborators::new(
            gateway.clone(),
            launcher.clone(),
            poller.clone(),
            notifier.clone(),
        )
        .with_ingestion(ingestion.clone());

        Harness {
            orchestrator: WorkflowOrchestrator::new(
                self.settings,
                collaborators,
                self.store.clone(),
            ),
            store: self.store,
            gateway,
            launcher,
            poller,
            notifier,
            ingestion,
        }
    }
}

impl Harness {
    /// Wait until the manifest request for `token` has been acknowledged and checkpointed
    pub async fn wait_for_pending(&self, token: &ContinuationToken) {
        let store = self.store.clone();
        let token = token.clone();
        wait_until(move || {
            let store = store.clone();
            let token = token.clone();
            async move {
                let Ok(Some(pending)) = store.resolve_pending(&token).await else {
                    return false;
                };
                matches!(
                    store.load(&pending.run_id).await,
                    Ok(Some(run)) if run.continuation_token.as_ref() == Some(&token)
                )
            }
        })
        .await;
    }
}

/// Poll `condition` every 50ms for up to five minutes, panicking if it never holds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..6_000 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met in time");
}
