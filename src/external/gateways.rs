//! Collaborators backed by external programs
//!
//! Each call runs the configured command with a JSON request on stdin and parses a
//! JSON response from stdout:
//!
//! | collaborator | request | response |
//! |---|---|---|
//! | manifest gateway | `{run_id, source}` | `{token}` |
//! | job launcher | `{run_id, manifest, handler, client_request_token}` | `{job_id}` |
//! | status poller | `{job_id}` | `{status, detail?}` |
//! | ingestion hand-off | the full run | exit status only |

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::command::{CommandError, CommandExecutor, CommandOutput};
use crate::config::CommandSpec;
use crate::workflow::{
    ContinuationToken, IngestionHandoff, JobId, JobLauncher, JobStatus, LaunchRequest,
    ManifestGateway, ManifestRequest, StatusPoller, StatusReport, TransportError, WorkflowRun,
};

impl From<CommandError> for TransportError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Timeout { timeout_ms } => {
                TransportError::Timeout(Duration::from_millis(timeout_ms))
            }
            other => TransportError::Connection(other.to_string()),
        }
    }
}

/// One configured program plus the executor that runs it
#[derive(Clone)]
struct CommandCall {
    executor: Arc<dyn CommandExecutor>,
    spec: CommandSpec,
}

impl CommandCall {
    async fn run<Req: Serialize + Sync>(&self, request: &Req) -> Result<CommandOutput, TransportError> {
        let input = serde_json::to_string(request)
            .map_err(|e| TransportError::InvalidResponse(format!("unserializable request: {}", e)))?;

        let output = self
            .executor
            .execute(&self.spec.program, &self.spec.args, Some(input))
            .await?;

        if !output.success() {
            return Err(TransportError::Connection(format!(
                "{} exited with status {}: {}",
                self.spec.program,
                output.status_code,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    async fn call<Req, Resp>(&self, request: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let output = self.run(request).await?;
        serde_json::from_str(output.stdout.trim()).map_err(|e| {
            TransportError::InvalidResponse(format!(
                "{} returned unparseable output: {}",
                self.spec.program, e
            ))
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct LaunchResponse {
    job_id: String,
}

#[derive(Serialize)]
struct StatusRequest<'a> {
    job_id: &'a JobId,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    detail: Option<String>,
}

pub struct CommandManifestGateway {
    call: CommandCall,
}

impl CommandManifestGateway {
    pub fn new(executor: Arc<dyn CommandExecutor>, spec: CommandSpec) -> Self {
        Self {
            call: CommandCall { executor, spec },
        }
    }
}

#[async_trait]
impl ManifestGateway for CommandManifestGateway {
    async fn request_manifest(
        &self,
        request: &ManifestRequest,
    ) -> Result<ContinuationToken, TransportError> {
        let response: TokenResponse = self.call.call(request).await?;
        if response.token.is_empty() {
            return Err(TransportError::InvalidResponse(
                "manifest gateway returned an empty token".to_string(),
            ));
        }
        Ok(ContinuationToken(response.token))
    }
}

pub struct CommandJobLauncher {
    call: CommandCall,
}

impl CommandJobLauncher {
    pub fn new(executor: Arc<dyn CommandExecutor>, spec: CommandSpec) -> Self {
        Self {
            call: CommandCall { executor, spec },
        }
    }
}

#[async_trait]
impl JobLauncher for CommandJobLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<JobId, TransportError> {
        let response: LaunchResponse = self.call.call(request).await?;
        Ok(JobId(response.job_id))
    }
}

pub struct CommandStatusPoller {
    call: CommandCall,
}

impl CommandStatusPoller {
    pub fn new(executor: Arc<dyn CommandExecutor>, spec: CommandSpec) -> Self {
        Self {
            call: CommandCall { executor, spec },
        }
    }
}

#[async_trait]
impl StatusPoller for CommandStatusPoller {
    async fn status(&self, job_id: &JobId) -> Result<StatusReport, TransportError> {
        let response: StatusResponse = self.call.call(&StatusRequest { job_id }).await?;
        Ok(StatusReport {
            status: JobStatus::from_external(&response.status),
            detail: response.detail,
        })
    }
}

pub struct CommandIngestionHandoff {
    call: CommandCall,
}

impl CommandIngestionHandoff {
    pub fn new(executor: Arc<dyn CommandExecutor>, spec: CommandSpec) -> Self {
        Self {
            call: CommandCall { executor, spec },
        }
    }
}

#[async_trait]
impl IngestionHandoff for CommandIngestionHandoff {
    async fn hand_off(&self, run: &WorkflowRun) -> Result<(), TransportError> {
        self.call.run(run).await.map(|_| ())
    }
}

/// Status poller sharing one request budget across every run
pub struct RateLimitedStatusPoller {
    inner: Arc<dyn StatusPoller>,
    rate_limiter: DefaultDirectRateLimiter,
}

impl RateLimitedStatusPoller {
    pub fn new(inner: Arc<dyn StatusPoller>, requests_per_minute: NonZeroU32) -> Self {
        let quota = Quota::per_minute(requests_per_minute).allow_burst(requests_per_minute);
        Self {
            inner,
            rate_limiter: RateLimiter::direct(quota),
        }
    }
}

#[async_trait]
impl StatusPoller for RateLimitedStatusPoller {
    async fn status(&self, job_id: &JobId) -> Result<StatusReport, TransportError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;
        debug!(job_id = %job_id, "Status request admitted by rate limiter");
        self.inner.status(job_id).await
    }
}
