use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::CourierError;

/// Environment variable consulted when `bot.token` is empty.
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Top-level Courier configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub courier: CourierConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// General runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Bot API credentials and endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: default_api_url(),
        }
    }
}

/// `getUpdates` polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Long-poll duration in seconds. 0 = short poll.
    #[serde(default)]
    pub timeout_secs: u64,
    /// Maximum updates per batch (remote default 100).
    #[serde(default)]
    pub limit: Option<u32>,
    /// Skip the pending backlog on startup.
    #[serde(default)]
    pub clean: bool,
    /// First offset to request. 0 = everything unconfirmed.
    #[serde(default)]
    pub start_offset: i64,
    /// Sleep after an `ok = false` response, in milliseconds.
    #[serde(default = "default_api_error_backoff_ms")]
    pub api_error_backoff_ms: u64,
    /// Update categories to receive. Empty = all.
    #[serde(default)]
    pub allowed_updates: Vec<String>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            limit: None,
            clean: false,
            start_offset: 0,
            api_error_backoff_ms: default_api_error_backoff_ms(),
            allowed_updates: Vec::new(),
        }
    }
}

/// Webhook listener and registration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Use webhook mode instead of polling.
    #[serde(default)]
    pub enabled: bool,
    /// Externally reachable base URL the Bot API posts to.
    #[serde(default)]
    pub url: String,
    /// Local listen host.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Local listen port.
    #[serde(default = "default_webhook_port")]
    pub port: u16,
    /// Path the endpoint is served on, appended to `url` when registering.
    #[serde(default)]
    pub path: String,
    /// Max concurrent deliveries (1-100, remote default 40).
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// Update categories to receive. Empty = all.
    #[serde(default)]
    pub allowed_updates: Vec<String>,
    /// Shared secret echoed back in `X-Telegram-Bot-Api-Secret-Token`.
    #[serde(default)]
    pub secret_token: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            listen: default_listen(),
            port: default_webhook_port(),
            path: String::new(),
            max_connections: None,
            allowed_updates: Vec::new(),
            secret_token: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_api_error_backoff_ms() -> u64 {
    1000
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_webhook_port() -> u16 {
    443
}

/// Parse configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, CourierError> {
    toml::from_str(content).map_err(|e| CourierError::Config(format!("failed to parse config: {e}")))
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist. An empty `bot.token`
/// is filled from `TELEGRAM_BOT_TOKEN`.
pub fn load(path: &str) -> Result<Config, CourierError> {
    let path = Path::new(path);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CourierError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        parse(&content)?
    } else {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    };

    if config.bot.token.is_empty() {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            config.bot.token = token;
        }
    }

    Ok(config)
}
