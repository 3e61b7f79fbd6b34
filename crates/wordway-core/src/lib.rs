//! Shared data model for the Wordway background service.
//!
//! Defines the config record and its patches, the message/response wire
//! shapes, the error taxonomy, CLI settings and session-notice rules used by
//! the store, runtime and binary crates.

pub mod error;
pub mod message;
pub mod models;
pub mod notifications;
pub mod settings;
pub mod time_utils;

pub use error::{ApiError, Result, WordwayError};
pub use message::{Message, Method, Response};
pub use models::{Config, ConfigPatch, JwtToken, User};
