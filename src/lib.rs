// ETL Orchestrator Library - Durable ingestion workflow orchestration
// This exposes the core components for testing and integration

pub mod cli;
pub mod config;
pub mod database;
pub mod external;
pub mod http;
pub mod observability;
pub mod shutdown;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use config::OrchestratorConfig;
pub use database::open_run_store;
pub use external::{
    CommandExecutor, CommandIngestionHandoff, CommandJobLauncher, CommandManifestGateway,
    CommandStatusPoller, ProcessCommandExecutor, RateLimitedStatusPoller, TracingNotifier,
    WebhookNotifier,
};
pub use http::RateLimitedHttpClient;
pub use observability::{create_run_span, orchestrator_metrics, OperationTimer, OrchestratorMetrics};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{init_telemetry, shutdown_telemetry};
pub use workflow::{
    CallbackInbox, Collaborators, FileSystemRunStore, InMemoryRunStore, InboxMessage,
    OrchestratorSettings, Phase, RunId, RunStatusReport, RunStore, SourceSpec, TriggerSchedule,
    WorkflowError, WorkflowMachine, WorkflowOrchestrator, WorkflowRun,
};
