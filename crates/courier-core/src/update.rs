//! Response envelopes, update envelopes, and the update channel.

use crate::error::CourierError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Producer side of the update channel.
pub type UpdateSender = mpsc::UnboundedSender<Update>;

/// Consumer side of the update channel.
pub type UpdateReceiver = mpsc::UnboundedReceiver<Update>;

/// Create the unbounded, ordered channel that connects acquisition to dispatch.
pub fn channel() -> (UpdateSender, UpdateReceiver) {
    mpsc::unbounded_channel()
}

/// Envelope returned by every Bot API method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
}

impl ApiResponse {
    /// A successful envelope carrying `result`.
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            description: None,
            error_code: None,
        }
    }

    /// A failed envelope with an error code and description.
    pub fn failure(error_code: i64, description: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            description: Some(description.into()),
            error_code: Some(error_code),
        }
    }

    /// Unwrap the result, mapping `ok = false` to [`CourierError::Api`].
    pub fn into_result(self) -> Result<Value, CourierError> {
        if !self.ok {
            return Err(CourierError::Api {
                code: self.error_code,
                description: self
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }

    /// Unwrap and decode the result into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, CourierError> {
        let value = self.into_result()?;
        serde_json::from_value(value).map_err(|e| CourierError::Decode(e.to_string()))
    }
}

/// One inbound update: the raw JSON plus its extracted `update_id`.
///
/// The payload is kept unparsed; handlers decode what they need with
/// [`Update::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    update_id: i64,
    raw: String,
}

#[derive(Deserialize)]
struct UpdateId {
    update_id: i64,
}

impl Update {
    /// Build an envelope from raw JSON text, keeping it verbatim.
    pub fn from_raw(raw: impl Into<String>) -> Result<Self, CourierError> {
        let raw = raw.into();
        let header: UpdateId = serde_json::from_str(&raw)
            .map_err(|e| CourierError::Decode(format!("update has no integer update_id: {e}")))?;
        Ok(Self {
            update_id: header.update_id,
            raw,
        })
    }

    /// Build an envelope from a request body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CourierError> {
        let raw = std::str::from_utf8(bytes)
            .map_err(|e| CourierError::Decode(format!("update is not valid utf-8: {e}")))?;
        Self::from_raw(raw)
    }

    /// Build an envelope from one element of a `getUpdates` result.
    pub fn from_value(value: Value) -> Result<Self, CourierError> {
        let update_id = value
            .get("update_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| CourierError::Decode("update has no integer update_id".into()))?;
        Ok(Self {
            update_id,
            raw: value.to_string(),
        })
    }

    pub fn id(&self) -> i64 {
        self.update_id
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decode the payload into a typed representation.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CourierError> {
        serde_json::from_str(&self.raw).map_err(|e| CourierError::Decode(e.to_string()))
    }

    /// The update category, e.g. `"message"` or `"callback_query"`.
    ///
    /// Bot API updates carry exactly one payload field next to `update_id`.
    /// Keys are compared in sorted order, so a body with several payload
    /// fields yields the alphabetically smallest one.
    pub fn kind(&self) -> Option<String> {
        let object: serde_json::Map<String, Value> = serde_json::from_str(&self.raw).ok()?;
        object.into_iter().map(|(k, _)| k).find(|k| k != "update_id")
    }
}
