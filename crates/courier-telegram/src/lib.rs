//! # courier-telegram
//!
//! Telegram Bot API integration: HTTP transport, update acquisition by
//! polling or webhook, and the dispatcher that consumes acquired updates.
//! Docs: <https://core.telegram.org/bots/api>

pub mod bot;
pub mod dispatcher;
pub mod polling;
pub mod transport;
pub mod types;
pub mod updater;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use bot::Bot;
pub use dispatcher::{Dispatcher, Handler};
pub use polling::{PollOutcome, Poller, PollerOptions};
pub use transport::HttpTransport;
pub use updater::Updater;
pub use webhook::Webhook;
