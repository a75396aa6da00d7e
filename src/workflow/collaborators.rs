// Narrow interfaces to the external systems the orchestrator drives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::notification::Notification;
use super::types::{
    ContinuationToken, HandlerRef, JobId, ManifestRef, RunId, SourceSpec, StatusReport,
    WorkflowRun,
};

/// Transport-level failure talking to an upstream service
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
    #[error("notification rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRequest {
    pub run_id: RunId,
    pub source: SourceSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub run_id: RunId,
    pub manifest: ManifestRef,
    pub handler: HandlerRef,
    /// Stable per run so a retried submission cannot create a second job
    pub client_request_token: String,
}

/// Builds manifests asynchronously; completion arrives later through `resume`
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ManifestGateway: Send + Sync {
    async fn request_manifest(
        &self,
        request: &ManifestRequest,
    ) -> Result<ContinuationToken, TransportError>;
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<JobId, TransportError>;
}

/// Read-only job status lookup; safe to call repeatedly
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait StatusPoller: Send + Sync {
    async fn status(&self, job_id: &JobId) -> Result<StatusReport, TransportError>;
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Hand-off to the downstream ingestion step
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait IngestionHandoff: Send + Sync {
    async fn hand_off(&self, run: &WorkflowRun) -> Result<(), TransportError>;
}

/// Ingestion hand-off used when no downstream step is configured
#[derive(Debug, Default, Clone)]
pub struct NoopIngestion;

#[async_trait]
impl IngestionHandoff for NoopIngestion {
    async fn hand_off(&self, run: &WorkflowRun) -> Result<(), TransportError> {
        info!(run_id = %run.run_id, "No downstream ingestion configured, skipping hand-off");
        Ok(())
    }
}
