use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// All errors produced by the Wordway background service.
#[derive(Error, Debug)]
pub enum WordwayError {
    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be written or renamed into place.
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed or produced.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A config record or patch did not have the expected shape.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The config store rejected a read or write.
    #[error("Config store error: {0}")]
    Store(String),

    /// The config manager's writer task is gone.
    #[error("Config manager is shut down")]
    ManagerClosed,

    /// The broker's dispatch loop has stopped accepting messages.
    #[error("Broker is shut down")]
    BrokerClosed,

    /// A native-messaging frame exceeded the permitted size.
    #[error("Frame of {len} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { len: usize, limit: usize },

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the wordway crates.
pub type Result<T> = std::result::Result<T, WordwayError>;

// ── ApiError ──────────────────────────────────────────────────────────────────

/// Failure value produced by an API client.
///
/// This is what a sender receives verbatim inside `{ "error": ... }`, so it
/// serialises to a tagged JSON object rather than a bare string.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ApiError {
    /// The request descriptor in the message arguments was unusable.
    #[error("Invalid request arguments: {message}")]
    InvalidArguments { message: String },

    /// The remote service answered with a non-success status.
    #[error("Request failed with status {status}")]
    Status { status: u16, body: Value },

    /// The request never produced a response (DNS, TLS, connection reset...).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The response body could not be decoded.
    #[error("Malformed response: {message}")]
    Decode { message: String },

    /// The client failed before producing any result.
    #[error("Internal client error: {message}")]
    Internal { message: String },
}

impl ApiError {
    /// JSON value delivered to the sender in the `error` slot.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.to_string()))
    }
}
