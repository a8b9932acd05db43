//! Telegram Bot API deserialization types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Telegram user or bot, as returned by `getMe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl User {
    /// `@username` when set, otherwise the full name.
    pub fn display_name(&self) -> String {
        if let Some(ref un) = self.username {
            format!("@{un}")
        } else if let Some(ref ln) = self.last_name {
            format!("{} {ln}", self.first_name)
        } else {
            self.first_name.clone()
        }
    }
}

/// Current webhook registration, as returned by `getWebhookInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookInfo {
    /// Empty when no webhook is set.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub has_custom_certificate: bool,
    #[serde(default)]
    pub pending_update_count: u64,
    /// Unix time of the most recent delivery error.
    #[serde(default)]
    pub last_error_date: Option<i64>,
    #[serde(default)]
    pub last_error_message: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub allowed_updates: Vec<String>,
}

impl WebhookInfo {
    pub fn is_active(&self) -> bool {
        !self.url.is_empty()
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.last_error_date
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }
}
