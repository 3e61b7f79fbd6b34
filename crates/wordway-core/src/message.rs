//! Wire shapes exchanged between extension contexts and the background.
//!
//! A [`Message`] is `{ "method": ..., "arguments": ... }`; a [`Response`] is
//! exactly one of `{ "response": ... }` or `{ "error": ... }`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Method ────────────────────────────────────────────────────────────────────

/// The closed set of methods the background knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Request,
    OpenOptionsPage,
    PlayAudio,
    AccountLogin,
    AccountLogout,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Request,
        Method::OpenOptionsPage,
        Method::PlayAudio,
        Method::AccountLogin,
        Method::AccountLogout,
    ];

    /// Wire spelling of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Request => "request",
            Method::OpenOptionsPage => "openOptionsPage",
            Method::PlayAudio => "playAudio",
            Method::AccountLogin => "accountLogin",
            Method::AccountLogout => "accountLogout",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a method string is not one of [`Method::ALL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported method: {}", self.0)
    }
}

impl std::error::Error for UnknownMethod {}

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// A request crossing the extension's process boundary.
///
/// `method` is kept as the raw string so that unsupported methods can be
/// reported by name rather than failing deserialisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl Message {
    pub fn new(method: Method, arguments: Value) -> Self {
        Self {
            method: method.as_str().to_string(),
            arguments,
        }
    }

    /// Classify the message, or return the unsupported method name.
    pub fn classify(&self) -> Result<Method, UnknownMethod> {
        self.method.parse()
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// Outcome delivered for a message that produces a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    /// `{ "response": value }`
    Response(Value),
    /// `{ "error": value }`
    Error(Value),
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Name of the JSON key this response is carried under.
    pub fn key(&self) -> &'static str {
        match self {
            Response::Response(_) => "response",
            Response::Error(_) => "error",
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Response::Response(v) | Response::Error(v) => v,
        }
    }
}
