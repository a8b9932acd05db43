//! HTTP request layer over `reqwest`.

use async_trait::async_trait;
use courier_core::{
    config::BotConfig,
    error::CourierError,
    traits::{Params, Transport},
    update::ApiResponse,
};
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack added on top of the long-poll duration so the server answers first.
const LONG_POLL_SLACK: Duration = Duration::from_secs(10);

/// Bot API transport posting form-encoded parameters.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for the configured endpoint and token.
    pub fn new(config: &BotConfig) -> Self {
        let base_url = format!("{}/bot{}", config.api_url.trim_end_matches('/'), config.token);
        Self {
            client: reqwest::Client::new(),
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Size the request timeout for a `getUpdates` long poll of `poll_timeout_secs`.
    pub fn for_long_poll(self, poll_timeout_secs: u64) -> Self {
        let timeout = (Duration::from_secs(poll_timeout_secs) + LONG_POLL_SLACK)
            .max(DEFAULT_REQUEST_TIMEOUT);
        self.with_request_timeout(timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, method: &str, params: &Params) -> Result<ApiResponse, CourierError> {
        let url = format!("{}/{method}", self.base_url);

        // `without_url` keeps the token out of error messages.
        let resp = self
            .client
            .post(&url)
            .form(params)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| CourierError::Transport(format!("{method} failed: {}", e.without_url())))?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| {
            CourierError::Transport(format!("{method} body read failed: {}", e.without_url()))
        })?;

        debug!("{method} answered {status} ({} bytes)", body.len());

        // Error statuses still carry a JSON envelope with `ok = false`.
        serde_json::from_slice::<ApiResponse>(&body).map_err(|e| {
            CourierError::Transport(format!("{method} returned a malformed envelope ({status}): {e}"))
        })
    }
}
