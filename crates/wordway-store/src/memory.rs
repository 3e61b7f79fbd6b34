//! In-process config store.
//!
//! Used when no durable storage is wanted and by tests, which can inject
//! write failures and write latency to exercise the manager's commit path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use wordway_core::models::Config;
use wordway_core::{Result, WordwayError};

use crate::store::ConfigStore;

#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<Option<Config>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    write_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `config` already stored.
    pub fn with_record(config: Config) -> Self {
        Self {
            record: Mutex::new(Some(config)),
            ..Self::default()
        }
    }

    /// Sleep for `delay` inside every `set` before committing.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Make subsequent writes fail until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// The currently committed record.
    pub fn snapshot(&self) -> Option<Config> {
        self.record.lock().clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self) -> Result<Option<Config>> {
        Ok(self.record.lock().clone())
    }

    async fn set(&self, config: &Config) -> Result<()> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WordwayError::Store("memory store is read-only".to_string()));
        }

        *self.record.lock() = Some(config.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
