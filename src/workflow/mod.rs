//! Ingestion workflow orchestration
//!
//! A run moves through a fixed pipeline:
//!
//! ```text
//! START -> NOTIFY_START -> BUILD_MANIFEST (await callback) -> LAUNCH_JOB -> POLLING (loop)
//!       -> COMPLETE_CONVERSION -> START_INGESTION -> END_INGESTION -> NOTIFY_END -> DONE
//! ```
//!
//! with FAILED reachable from every live phase. `state_machine` holds the transition
//! table, `orchestrator` executes the resulting actions against the `collaborators`,
//! and `persistence` keeps every run durable between transitions. `retention` sweeps
//! expired archives while the process serves.

pub mod collaborators;
pub mod error;
pub mod inbox;
pub mod notification;
pub mod orchestrator;
pub mod persistence;
pub mod retention;
pub mod state_machine;
pub mod trigger;
pub mod types;

pub use collaborators::{
    IngestionHandoff, JobLauncher, LaunchRequest, ManifestGateway, ManifestRequest, NoopIngestion,
    NotifyError, Notifier, StatusPoller, TransportError,
};
pub use error::WorkflowError;
pub use inbox::{CallbackInbox, DrainReport, InboxError, InboxMessage};
pub use notification::{Notification, NotificationEvent};
pub use orchestrator::{Collaborators, OrchestratorSettings, WorkflowOrchestrator};
pub use persistence::{
    CheckpointReason, FileSystemRunStore, InMemoryRunStore, PersistenceConfig, PersistenceError,
    RunStore,
};
pub use retention::ArchiveRetention;
pub use state_machine::{
    Action, RetryPolicy, Transition, UpstreamOperation, WorkflowEvent, WorkflowMachine,
};
pub use trigger::TriggerSchedule;
pub use types::{
    ContinuationToken, FailureCause, FailureKind, HandlerRef, JobId, JobStatus, ManifestRef,
    Outcome, PendingOperation, Phase, RunId, RunStatusReport, SourceSpec, StatusReport,
    TerminalResult, TransitionRecord, WorkflowRun,
};

#[cfg(any(test, feature = "testing"))]
pub use collaborators::{
    MockIngestionHandoff, MockJobLauncher, MockManifestGateway, MockNotifier, MockStatusPoller,
};
