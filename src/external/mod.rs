//! External collaborator implementations
//!
//! Concrete manifest gateway, job launcher, status poller, ingestion hand-off and
//! notifiers behind the traits in `crate::workflow::collaborators`. Command-backed
//! collaborators exchange JSON with external programs; notifiers log or POST to a
//! webhook.

pub mod command;
pub mod gateways;
pub mod notifier;

pub use command::{CommandError, CommandExecutor, CommandOutput, ProcessCommandExecutor};
pub use gateways::{
    CommandIngestionHandoff, CommandJobLauncher, CommandManifestGateway, CommandStatusPoller,
    RateLimitedStatusPoller,
};
pub use notifier::{TracingNotifier, WebhookNotifier};

#[cfg(any(test, feature = "testing"))]
pub use command::MockCommandExecutor;
