//! Scripted transport shared by the unit tests.

use async_trait::async_trait;
use courier_core::{
    error::CourierError,
    traits::{Params, Transport},
    update::ApiResponse,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::MakeWriter;

/// One recorded call.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub method: String,
    pub params: Params,
    pub at: Instant,
}

/// A transport that replays scripted responses per method and records calls.
///
/// When a method's script runs dry it answers with a transport error and
/// fires the optional drain token, which lets polling tests stop the loop.
#[derive(Default)]
pub(crate) struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<ApiResponse, CourierError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    drained: Option<CancellationToken>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_when_drained(mut self, token: CancellationToken) -> Self {
        self.drained = Some(token);
        self
    }

    pub fn push(&self, method: &str, response: ApiResponse) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Ok(response));
        self
    }

    pub fn push_err(&self, method: &str, error: CourierError) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, method: &str, params: &Params) -> Result<ApiResponse, CourierError> {
        // Keep retry loops from starving the test runtime.
        tokio::task::yield_now().await;

        self.calls.lock().unwrap().push(RecordedCall {
            method: method.to_string(),
            params: params.clone(),
            at: Instant::now(),
        });

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);

        match next {
            Some(result) => result,
            None => {
                if let Some(ref token) = self.drained {
                    token.cancel();
                }
                Err(CourierError::Transport(format!("no scripted response for {method}")))
            }
        }
    }
}

/// A `getUpdates` success with one message update per id.
pub(crate) fn batch(ids: &[i64]) -> ApiResponse {
    let updates: Vec<Value> = ids.iter().map(|&id| update_json(id)).collect();
    ApiResponse::success(Value::Array(updates))
}

pub(crate) fn update_json(id: i64) -> Value {
    json!({
        "update_id": id,
        "message": {
            "message_id": id * 10,
            "chat": {"id": 100, "type": "private"},
            "text": format!("update {id}")
        }
    })
}

pub(crate) fn me() -> ApiResponse {
    ApiResponse::success(json!({
        "id": 7,
        "is_bot": true,
        "first_name": "Relay",
        "username": "relay_bot"
    }))
}

/// Captures formatted log lines for assertions.
#[derive(Clone, Default)]
pub(crate) struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    /// A plain-text subscriber writing into this buffer.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(self.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().unwrap()).to_string()
    }
}

pub(crate) struct LogWriter {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
