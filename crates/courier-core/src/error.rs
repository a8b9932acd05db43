use thiserror::Error;

/// Top-level error type for Courier.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Network-level failure: connection refused, timeout, malformed HTTP.
    #[error("transport error: {0}")]
    Transport(String),

    /// The Bot API answered with `ok = false`.
    #[error("api error: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    /// An update or result payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Startup failed before acquisition could begin.
    #[error("setup error: {0}")]
    Setup(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
