//! `getUpdates` polling loop and offset cursor.

use courier_core::{
    config::PollingConfig,
    error::CourierError,
    traits::{Params, Transport},
    update::{Update, UpdateSender},
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Sleep after an `ok = false` answer.
pub const API_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Poller settings.
#[derive(Debug, Clone)]
pub struct PollerOptions {
    /// Long-poll duration sent as `timeout`. 0 = short poll.
    pub timeout_secs: u64,
    pub limit: Option<u32>,
    /// Update categories to receive. Empty = server default.
    pub allowed_updates: Vec<String>,
    /// Use the first batch only to set the cursor.
    pub clean: bool,
    pub start_offset: i64,
    pub api_error_backoff: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            limit: None,
            allowed_updates: Vec::new(),
            clean: false,
            start_offset: 0,
            api_error_backoff: API_ERROR_BACKOFF,
        }
    }
}

impl From<&PollingConfig> for PollerOptions {
    fn from(config: &PollingConfig) -> Self {
        Self {
            timeout_secs: config.timeout_secs,
            limit: config.limit,
            allowed_updates: config.allowed_updates.clone(),
            clean: config.clean,
            start_offset: config.start_offset,
            api_error_backoff: Duration::from_millis(config.api_error_backoff_ms),
        }
    }
}

/// What one fetch round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// This many updates were queued and the cursor advanced past them.
    Delivered(usize),
    /// Clean start: this many updates only moved the cursor.
    Skipped(usize),
    /// No new updates.
    Empty,
    /// The request never produced an envelope. Retry immediately.
    TransportError,
    /// `ok = false` or an undecodable result. Back off, then retry.
    ApiError,
    /// The update channel has no consumer left.
    Closed,
}

/// Owner of the offset cursor.
///
/// Only one task drives a poller, so the cursor needs no synchronization.
pub struct Poller {
    transport: Arc<dyn Transport>,
    options: PollerOptions,
    offset: i64,
    clean: bool,
}

impl Poller {
    pub fn new(transport: Arc<dyn Transport>, options: PollerOptions) -> Self {
        Self {
            transport,
            offset: options.start_offset,
            clean: options.clean,
            options,
        }
    }

    /// Next update id to request.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Whether the backlog skip is still pending.
    pub fn is_clean(&self) -> bool {
        self.clean
    }

    fn params(&self) -> Params {
        let mut params = Params::new();
        params.insert("offset".into(), self.offset.to_string());
        params.insert("timeout".into(), self.options.timeout_secs.to_string());
        if let Some(limit) = self.options.limit {
            params.insert("limit".into(), limit.to_string());
        }
        if !self.options.allowed_updates.is_empty() {
            // Vec<String> always serializes.
            if let Ok(allowed) = serde_json::to_string(&self.options.allowed_updates) {
                params.insert("allowed_updates".into(), allowed);
            }
        }
        params
    }

    /// Fetch one batch and queue it.
    ///
    /// The cursor moves only after every envelope of the batch is in the
    /// channel. Sends are synchronous, so once the fetch returns nothing can
    /// interrupt the enqueue-then-advance sequence.
    pub async fn poll_once(&mut self, tx: &UpdateSender) -> PollOutcome {
        let response = match self.transport.call("getUpdates", &self.params()).await {
            Ok(r) => r,
            Err(e) => {
                error!("unable to getUpdates: {e}");
                return PollOutcome::TransportError;
            }
        };

        if !response.ok {
            error!(
                "getUpdates error (retry in {:?}): {}",
                self.options.api_error_backoff,
                response.description.as_deref().unwrap_or("no description")
            );
            return PollOutcome::ApiError;
        }

        let batch = match decode_batch(response.result) {
            Ok(b) => self.in_order(b),
            Err(e) => {
                error!(
                    "getUpdates result rejected (retry in {:?}): {e}",
                    self.options.api_error_backoff
                );
                return PollOutcome::ApiError;
            }
        };

        let Some(last_id) = batch.last().map(Update::id) else {
            // No backlog at startup: later updates are live.
            if self.clean {
                self.clean = false;
                info!("clean start: no pending updates");
            }
            return PollOutcome::Empty;
        };
        let next_offset = last_id + 1;
        let count = batch.len();

        if self.clean {
            self.clean = false;
            self.offset = next_offset;
            info!("clean start: skipped {count} pending updates, offset now {next_offset}");
            return PollOutcome::Skipped(count);
        }

        for update in batch {
            if tx.send(update).is_err() {
                return PollOutcome::Closed;
            }
        }
        self.offset = next_offset;

        PollOutcome::Delivered(count)
    }

    /// Drop envelopes that would break strictly increasing order.
    fn in_order(&self, batch: Vec<Update>) -> Vec<Update> {
        let mut last = self.offset.saturating_sub(1);
        batch
            .into_iter()
            .filter(|u| {
                if u.id() <= last {
                    error!(
                        "dropping update {}: out of order (previous {last}, offset {})",
                        u.id(),
                        self.offset
                    );
                    false
                } else {
                    last = u.id();
                    true
                }
            })
            .collect()
    }

    /// Poll until `cancel` fires or the channel closes. Returns the final offset.
    ///
    /// Transport errors retry immediately; API errors sleep for the configured
    /// backoff first. Neither ends the loop.
    pub async fn run(mut self, tx: UpdateSender, cancel: CancellationToken) -> i64 {
        info!(
            "polling started (offset {}, timeout {}s, clean {})",
            self.offset, self.options.timeout_secs, self.clean
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once(&tx) => outcome,
            };

            match outcome {
                PollOutcome::ApiError => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.options.api_error_backoff) => {}
                    }
                }
                PollOutcome::Closed => {
                    info!("update channel closed, stopping poll");
                    break;
                }
                _ => {}
            }
        }

        info!("polling stopped at offset {}", self.offset);
        self.offset
    }
}

/// Split a `getUpdates` result into envelopes, preserving order.
///
/// A result that is not an array fails the whole batch; a single element
/// without a usable `update_id` is skipped.
fn decode_batch(result: Option<Value>) -> Result<Vec<Update>, CourierError> {
    let items = match result {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(CourierError::Decode(format!(
                "expected an array of updates, got {other}"
            )))
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match Update::from_value(item) {
            Ok(u) => Some(u),
            Err(e) => {
                warn!("skipping malformed update: {e}");
                None
            }
        })
        .collect())
}
