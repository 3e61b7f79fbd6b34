//! Runtime layer for the Wordway background service.
//!
//! Owns the shared config manager, routes extension messages through the
//! broker, and speaks the browser's native messaging protocol.

pub mod api_client;
pub mod broker;
pub mod config_manager;
pub mod host;
pub mod observer;
pub mod pending;
pub mod service;
pub mod transport;
