//! Handlers installed by the runner.

use async_trait::async_trait;
use courier_core::{error::CourierError, update::Update};
use courier_telegram::{Bot, Handler};
use serde_json::Value;
use tracing::info;

const PREVIEW_CHARS: usize = 64;

/// Logs a one-line summary of every update.
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, _bot: &Bot, update: &Update) -> Result<(), CourierError> {
        info!("{}", summarize(update));
        Ok(())
    }
}

/// `update <id> <kind>` plus chat and text preview when present.
fn summarize(update: &Update) -> String {
    let kind = update.kind().unwrap_or_else(|| "unknown".to_string());
    let mut line = format!("update {} {kind}", update.id());

    let Ok(value) = update.parse::<Value>() else {
        return line;
    };
    let body = &value[kind.as_str()];

    if let Some(chat_id) = body["chat"]["id"].as_i64() {
        line.push_str(&format!(" chat={chat_id}"));
    }
    if let Some(text) = body["text"].as_str() {
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if text.chars().count() > PREVIEW_CHARS {
            "…"
        } else {
            ""
        };
        line.push_str(&format!(" text={preview:?}{ellipsis}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_message() {
        let update = Update::from_raw(
            r#"{"update_id": 12, "message": {"chat": {"id": -100}, "text": "hello"}}"#,
        )
        .unwrap();
        assert_eq!(summarize(&update), r#"update 12 message chat=-100 text="hello""#);
    }

    #[test]
    fn test_summarize_truncates_long_text() {
        let text = "x".repeat(100);
        let raw = format!(r#"{{"update_id": 1, "message": {{"text": "{text}"}}}}"#);
        let summary = summarize(&Update::from_raw(raw).unwrap());
        assert!(summary.ends_with('…'));
        assert!(summary.contains(&"x".repeat(64)));
        assert!(!summary.contains(&"x".repeat(65)));
    }

    #[test]
    fn test_summarize_other_kinds() {
        let update =
            Update::from_raw(r#"{"update_id": 3, "callback_query": {"id": "q", "data": "ok"}}"#)
                .unwrap();
        assert_eq!(summarize(&update), "update 3 callback_query");

        let bare = Update::from_raw(r#"{"update_id": 4}"#).unwrap();
        assert_eq!(summarize(&bare), "update 4 unknown");
    }
}
