use crate::{error::CourierError, update::ApiResponse};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Key/value parameters of a Bot API call, sent as a form.
pub type Params = BTreeMap<String, String>;

/// Request layer trait — the wire.
///
/// Issues one Bot API method call and returns the decoded response envelope.
/// Network failures surface as [`CourierError::Transport`]; an envelope with
/// `ok = false` is still `Ok` so callers can tell the two apart.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Call `method` with the given parameters.
    async fn call(&self, method: &str, params: &Params) -> Result<ApiResponse, CourierError>;
}
