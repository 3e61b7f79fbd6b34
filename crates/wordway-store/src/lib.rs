//! Persistence layer for the Wordway background service.
//!
//! Provides the [`ConfigStore`] contract and two implementations: a scoped
//! JSON file store used by the binary, and an in-memory store for tests and
//! embedding.

pub mod json_file;
pub mod memory;
pub mod store;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use store::ConfigStore;
