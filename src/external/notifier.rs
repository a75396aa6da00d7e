use async_trait::async_trait;
use serde::Serialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::info;

use crate::http::{HttpError, RateLimitedHttpClient};
use crate::workflow::{Notification, Notifier, NotifyError};

/// Writes every notification to the structured log
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            event = notification.name(),
            subject = notification.subject(),
            payload = %notification.payload,
            "{}",
            notification.summary
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    subject: &'a str,
    message: &'a str,
    event: &'a str,
    payload: &'a serde_json::Value,
}

/// POSTs `{subject, message, event, payload}` to a webhook
pub struct WebhookNotifier {
    client: RateLimitedHttpClient,
    url: String,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        requests_per_minute: NonZeroU32,
        timeout: Duration,
    ) -> Result<Self, HttpError> {
        Ok(Self {
            client: RateLimitedHttpClient::new(requests_per_minute, timeout)?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn publish(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = WebhookBody {
            subject: notification.subject(),
            message: &notification.summary,
            event: notification.name(),
            payload: &notification.payload,
        };

        self.client
            .post_json(&self.url, &body)
            .await
            .map_err(|e| match e {
                HttpError::Status { status, .. } if (400..500).contains(&status) => {
                    NotifyError::Rejected(e.to_string())
                }
                other => NotifyError::Unavailable(other.to_string()),
            })
    }
}
