use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::WorkflowRun;

/// Lifecycle events published to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationEvent {
    WorkflowStart,
    ConversionStart,
    ConversionEnd,
    IngestionStart,
    IngestionEnd,
    WorkflowEnd,
    WorkflowFailed,
}

impl NotificationEvent {
    pub fn name(self) -> &'static str {
        match self {
            NotificationEvent::WorkflowStart => "workflow-start",
            NotificationEvent::ConversionStart => "conversion-start",
            NotificationEvent::ConversionEnd => "conversion-end",
            NotificationEvent::IngestionStart => "ingestion-start",
            NotificationEvent::IngestionEnd => "ingestion-end",
            NotificationEvent::WorkflowEnd => "workflow-end",
            NotificationEvent::WorkflowFailed => "workflow-failed",
        }
    }

    pub fn subject(self) -> &'static str {
        match self {
            NotificationEvent::WorkflowStart => "ETL: Launching Workflow",
            NotificationEvent::ConversionStart => "ETL: Starting RDF conversion",
            NotificationEvent::ConversionEnd => "ETL: RDF conversion is finished",
            NotificationEvent::IngestionStart => "ETL: Starting Ingestion",
            NotificationEvent::IngestionEnd => "ETL: Ingestion is finished",
            NotificationEvent::WorkflowEnd => "ETL: Workflow is finished",
            NotificationEvent::WorkflowFailed => "ETL: Workflow failed",
        }
    }

    fn message(self) -> &'static str {
        match self {
            NotificationEvent::WorkflowStart => "Launching ETL Workflow",
            NotificationEvent::ConversionStart => "Starting RDF conversion",
            NotificationEvent::ConversionEnd => "RDF conversion is finished",
            NotificationEvent::IngestionStart => "Starting Ingestion",
            NotificationEvent::IngestionEnd => "Ingestion is finished",
            NotificationEvent::WorkflowEnd => "Workflow is finished",
            NotificationEvent::WorkflowFailed => "Workflow failed",
        }
    }

    pub fn is_ingestion(self) -> bool {
        matches!(
            self,
            NotificationEvent::IngestionStart | NotificationEvent::IngestionEnd
        )
    }
}

/// A message handed to the notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub summary: String,
    pub payload: Value,
}

impl Notification {
    /// Build the notification for `event` from the run's current state.
    ///
    /// The final two events carry the last recorded job status so observers see
    /// the outcome without querying the orchestrator.
    pub fn for_run(event: NotificationEvent, run: &WorkflowRun) -> Self {
        let mut payload = json!({
            "message": event.message(),
            "run_id": run.run_id,
            "phase": run.phase,
            "source": run.source,
        });

        if let Some(object) = payload.as_object_mut() {
            if let Some(job_id) = &run.job_id {
                object.insert("job_id".to_string(), json!(job_id));
            }
            if let Some(manifest) = &run.manifest_ref {
                object.insert("manifest".to_string(), json!(manifest));
            }
            if matches!(
                event,
                NotificationEvent::WorkflowEnd | NotificationEvent::WorkflowFailed
            ) {
                object.insert("last_status".to_string(), json!(run.last_status));
                object.insert("poll_attempts".to_string(), json!(run.poll_attempts));
                if let Some(result) = &run.terminal_result {
                    object.insert("result".to_string(), json!(result));
                }
            }
        }

        let summary = match (&run.terminal_result, event) {
            (Some(result), NotificationEvent::WorkflowFailed) => {
                format!("{} (run {}): {}", event.message(), run.run_id, result.detail)
            }
            _ => format!("{} (run {})", event.message(), run.run_id),
        };

        Self {
            event,
            summary,
            payload,
        }
    }

    pub fn name(&self) -> &'static str {
        self.event.name()
    }

    pub fn subject(&self) -> &'static str {
        self.event.subject()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{JobStatus, SourceSpec, StatusReport};
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_end_notification_carries_last_status() {
        let mut run = WorkflowRun::new(
            SourceSpec::new("s3-equivalent://bucket/src"),
            Utc::now(),
            Duration::from_secs(60),
        );
        run.last_status = Some(StatusReport::new(JobStatus::Succeeded).with_detail("1200 tasks"));

        let notification = Notification::for_run(NotificationEvent::WorkflowEnd, &run);
        assert_eq!(notification.name(), "workflow-end");
        assert_eq!(notification.subject(), "ETL: Workflow is finished");
        assert_eq!(notification.payload["last_status"]["status"], "SUCCEEDED");
        assert_eq!(notification.payload["last_status"]["detail"], "1200 tasks");
    }

    #[test]
    fn test_start_notification_omits_status() {
        let run = WorkflowRun::new(
            SourceSpec::new("s3-equivalent://bucket/src"),
            Utc::now(),
            Duration::from_secs(60),
        );
        let notification = Notification::for_run(NotificationEvent::WorkflowStart, &run);
        assert!(notification.payload.get("last_status").is_none());
        assert!(notification.summary.contains(run.run_id.as_str()));
    }
}
