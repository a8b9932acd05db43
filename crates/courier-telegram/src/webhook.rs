//! Webhook listener: an axum endpoint that forwards each pushed update onto
//! the update channel.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use courier_core::{
    config::WebhookConfig,
    error::CourierError,
    update::{Update, UpdateSender},
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Header carrying the secret registered with `setWebhook`.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Largest accepted update body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const HEALTH_PATH: &str = "/health";

/// Webhook registration and listen settings.
#[derive(Debug, Clone)]
pub struct Webhook {
    /// Local listen host.
    pub listen: String,
    /// Local listen port. 0 picks an ephemeral port.
    pub port: u16,
    /// Path the endpoint is served on.
    pub path: String,
    /// Externally reachable base URL; `path` is appended when registering.
    pub url: String,
    /// Max concurrent deliveries, 1-100. `None` keeps the remote default (40).
    pub max_connections: Option<u32>,
    /// Update categories to receive. Empty = all.
    pub allowed_updates: Vec<String>,
    pub secret_token: Option<String>,
}

impl Default for Webhook {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: 443,
            path: String::new(),
            url: String::new(),
            max_connections: None,
            allowed_updates: Vec::new(),
            secret_token: None,
        }
    }
}

impl From<&WebhookConfig> for Webhook {
    fn from(config: &WebhookConfig) -> Self {
        Self {
            listen: config.listen.clone(),
            port: config.port,
            path: config.path.clone(),
            url: config.url.clone(),
            max_connections: config.max_connections,
            allowed_updates: config.allowed_updates.clone(),
            secret_token: config.secret_token.clone(),
        }
    }
}

impl Webhook {
    /// `host:port` to bind, with an empty host meaning all interfaces.
    pub fn listen_addr(&self) -> String {
        let host = if self.listen.is_empty() {
            "0.0.0.0"
        } else {
            self.listen.as_str()
        };
        format!("{host}:{}", self.port)
    }

    /// The local route, always starting with `/`.
    pub fn endpoint_path(&self) -> String {
        format!("/{}", self.path.trim_start_matches('/'))
    }

    /// The URL registered with `setWebhook`.
    pub fn public_url(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }

    pub fn validate(&self) -> Result<(), CourierError> {
        if let Some(max) = self.max_connections {
            if !(1..=100).contains(&max) {
                return Err(CourierError::Config(format!(
                    "webhook max_connections must be between 1 and 100, got {max}"
                )));
            }
        }
        if self.endpoint_path() == HEALTH_PATH {
            return Err(CourierError::Config(format!(
                "webhook path {HEALTH_PATH} is reserved"
            )));
        }
        Ok(())
    }
}

/// Shared state for the webhook handlers.
#[derive(Clone)]
struct WebhookState {
    tx: UpdateSender,
    secret_token: Option<String>,
}

/// Constant-time string comparison for the secret token header.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// `GET /health` — liveness probe.
async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// `POST /{path}` — one update per request, forwarded verbatim.
async fn receive(
    headers: HeaderMap,
    State(state): State<WebhookState>,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.secret_token {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        if !provided.is_some_and(|p| constant_time_eq(p, expected)) {
            warn!("webhook request rejected: secret token mismatch");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update = match Update::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            warn!("webhook body rejected: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };

    let update_id = update.id();
    if state.tx.send(update).is_err() {
        error!("update channel closed, webhook update {update_id} not queued");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    debug!("webhook queued update {update_id}");
    StatusCode::OK
}

/// Build the axum router for `webhook`.
pub fn build_router(webhook: &Webhook, tx: UpdateSender) -> Router {
    let state = WebhookState {
        tx,
        secret_token: webhook.secret_token.clone(),
    };
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(&webhook.endpoint_path(), post(receive))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Bind the listen address and serve until `cancel` fires.
///
/// Binding happens before this returns, so an unavailable port is reported
/// as [`CourierError::Setup`] instead of surfacing later in the background.
pub async fn serve(
    webhook: &Webhook,
    tx: UpdateSender,
    cancel: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>), CourierError> {
    webhook.validate()?;

    let addr = webhook.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CourierError::Setup(format!("webhook failed to bind to {addr}: {e}")))?;
    let local_addr = listener.local_addr()?;
    let app = build_router(webhook, tx);

    info!(
        "webhook listening on {local_addr}{}",
        webhook.endpoint_path()
    );

    let handle = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("webhook server error: {e}");
        }
        info!("webhook server stopped");
    });

    Ok((local_addr, handle))
}
