//! Scoped key-value store backed by a single JSON file.
//!
//! The file holds a JSON object mapping scope keys to records, the same shape
//! an extension's local storage area has. A [`JsonFileStore`] owns one scope
//! and leaves every other key in the file untouched.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use wordway_core::models::Config;
use wordway_core::{Result, WordwayError};

use crate::store::ConfigStore;

/// Default file name inside the data directory.
pub const STORAGE_FILE_NAME: &str = "storage.json";

// ── JsonFileStore ─────────────────────────────────────────────────────────────

pub struct JsonFileStore {
    /// Path to the storage file.
    path: PathBuf,
    /// Key the config record lives under.
    scope: String,
    /// Serialises read-modify-write cycles on the file.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Store the record under `scope` in `<dir>/storage.json`.
    pub fn in_dir(dir: &Path, scope: impl Into<String>) -> Self {
        Self::new(dir.join(STORAGE_FILE_NAME), scope)
    }

    pub fn new(path: PathBuf, scope: impl Into<String>) -> Self {
        Self {
            path,
            scope: scope.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    // ── Private helpers ───────────────────────────────────────────────────

    /// Read every scope in the file.
    ///
    /// A missing file is an empty map. An unparsable file is logged and also
    /// treated as empty, so the next write replaces it.
    async fn read_all(&self) -> Result<Map<String, Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(WordwayError::FileRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => {
                warn!(
                    path = %self.path.display(),
                    found = %type_name(&other),
                    "storage file is not a JSON object; ignoring its contents"
                );
                Ok(Map::new())
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.path.display(),
                    "failed to parse storage file; ignoring its contents"
                );
                Ok(Map::new())
            }
        }
    }

    /// Write `map` to a temp file then rename it over the storage file.
    async fn write_all(&self, map: &Map<String, Value>) -> Result<()> {
        let write_err = |source| WordwayError::FileWrite {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_err)?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn get(&self) -> Result<Option<Config>> {
        let mut all = self.read_all().await?;
        match all.remove(&self.scope) {
            None | Some(Value::Null) => Ok(None),
            Some(record) => serde_json::from_value(record)
                .map(Some)
                .map_err(|e| WordwayError::InvalidConfig(e.to_string())),
        }
    }

    async fn set(&self, config: &Config) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut all = self.read_all().await?;
        all.insert(self.scope.clone(), serde_json::to_value(config)?);
        self.write_all(&all).await?;

        debug!(path = %self.path.display(), scope = %self.scope, "config record written");
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
