use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Rate-limited HTTP client shared by outbound integrations
///
/// Every request waits for a permit first, so a burst of run transitions cannot
/// flood the receiving endpoint.
#[derive(Debug, Clone)]
pub struct RateLimitedHttpClient {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl RateLimitedHttpClient {
    pub fn new(requests_per_minute: NonZeroU32, timeout: Duration) -> Result<Self, HttpError> {
        let quota = Quota::per_minute(requests_per_minute).allow_burst(requests_per_minute);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("etl-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    /// POST a JSON body; non-2xx responses are errors
    pub async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), HttpError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        debug!(url = %url, "Executing rate-limited POST");
        let response = self.client.post(url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
