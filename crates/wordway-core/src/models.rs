use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{Result, WordwayError};

// ── JwtToken ──────────────────────────────────────────────────────────────────

/// Session token issued to a signed-in user.
///
/// Only `expiresIn` is required. It is kept as the JSON number the web app
/// sent, integer or not, so the record reads back exactly as it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtToken {
    /// Expiry in seconds since the Unix epoch.
    pub expires_in: Number,
    /// `accessToken` and any other token fields, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JwtToken {
    /// A token with no fields besides its expiry.
    pub fn expiring_at(expires_in: i64) -> Self {
        Self {
            expires_in: Number::from(expires_in),
            extra: Map::new(),
        }
    }

    /// Bearer credential, when the web app hands it to the extension.
    pub fn access_token(&self) -> Option<&str> {
        self.extra.get("accessToken").and_then(Value::as_str)
    }

    /// Expiry truncated to whole seconds, when it fits in an `i64`.
    pub fn expires_at_secs(&self) -> Option<i64> {
        self.expires_in.as_i64().or_else(|| {
            self.expires_in
                .as_f64()
                .filter(|secs| secs.is_finite() && secs.abs() < i64::MAX as f64)
                .map(|secs| secs.trunc() as i64)
        })
    }

    /// `true` when the token expired strictly before `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.expires_in.as_i64() {
            Some(secs) => secs < now,
            None => self
                .expires_in
                .as_f64()
                .is_some_and(|secs| secs < now as f64),
        }
    }
}

// ── User ──────────────────────────────────────────────────────────────────────

/// The signed-in account stored under `loggedInUser`.
///
/// Profile fields (`name`, `email`, `avatarUrl`, ...) live in `extra` exactly
/// as the service sent them, explicit `null`s included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub jwt_token: JwtToken,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(jwt_token: JwtToken) -> Self {
        Self {
            jwt_token,
            extra: Map::new(),
        }
    }

    /// Set a profile field.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.extra.get("name").and_then(Value::as_str)
    }

    pub fn email(&self) -> Option<&str> {
        self.extra.get("email").and_then(Value::as_str)
    }

    pub fn avatar_url(&self) -> Option<&str> {
        self.extra.get("avatarUrl").and_then(Value::as_str)
    }

    /// `true` when the token expired strictly before `now` (seconds since epoch).
    ///
    /// A token whose `expiresIn` equals `now` is still valid.
    pub fn is_token_expired_at(&self, now: i64) -> bool {
        self.jwt_token.is_expired_at(now)
    }

    /// Name to show in notices, falling back to the email address.
    pub fn display_name(&self) -> Option<&str> {
        self.name().or(self.email())
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

/// The single shared configuration record.
///
/// Serialised with camelCase keys. Fields this crate does not model are kept
/// in `extra` so that writers from other surfaces never lose data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub logged_in_user: Option<User>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Config {
    /// Return a new record with every key present in `patch` overwritten.
    ///
    /// Keys absent from the patch are left as they are. An explicit `null`
    /// clears the field.
    pub fn merged(&self, patch: &ConfigPatch) -> Result<Config> {
        let mut object = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(WordwayError::InvalidConfig(format!(
                    "config serialised to {other} instead of an object"
                )))
            }
        };

        for (key, value) in patch.iter() {
            object.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(object))
            .map_err(|e| WordwayError::InvalidConfig(e.to_string()))
    }

    /// Credential to attach to API requests, if any.
    ///
    /// The standalone `accessToken` slot wins over the token embedded in the
    /// user record.
    pub fn bearer_token(&self) -> Option<&str> {
        self.access_token.as_deref().or_else(|| {
            self.logged_in_user
                .as_ref()
                .and_then(|u| u.jwt_token.access_token())
        })
    }
}

// ── ConfigPatch ───────────────────────────────────────────────────────────────

/// A partial config: the keys present replace the matching config fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigPatch(Map<String, Value>);

impl ConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch from message arguments, which must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(WordwayError::InvalidConfig(format!(
                "config patch must be an object, got {other}"
            ))),
        }
    }

    /// The patch written when a session is cleared from the background.
    pub fn logout() -> Self {
        Self::new()
            .with("accessToken", Value::Null)
            .with("loggedInUser", Value::Null)
    }

    /// Replace only the `loggedInUser` slot.
    pub fn logged_in_user(user: Option<&User>) -> Result<Self> {
        let value = match user {
            Some(user) => serde_json::to_value(user)?,
            None => Value::Null,
        };
        Ok(Self::new().with("loggedInUser", value))
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.0.insert(key.to_string(), value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
