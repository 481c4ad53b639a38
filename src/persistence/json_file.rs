// SPDX-License-Identifier: Apache-2.0

//! JSON file-based persistence with atomic writes.
//!
//! Every scope lives in one JSON document. Values that are JSON objects or
//! arrays are stored as-is so the file stays human-readable; any other value
//! is stored as a base64 string. Writes go to a temp file that is then
//! renamed over the database.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::store::Persister;
use crate::error::{Error, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseState {
    scopes: HashMap<String, HashMap<String, Value>>,
}

/// A shared JSON file database handle
#[derive(Clone)]
pub struct JsonFileDatabase {
    path: PathBuf,
    state: Arc<RwLock<DatabaseState>>,
}

impl JsonFileDatabase {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let file = File::open(&path)
                .map_err(|e| Error::Persistence(format!("failed to open database: {}", e)))?;
            let reader = BufReader::new(file);
            serde_json::from_reader(reader)
                .map_err(|e| Error::Persistence(format!("failed to parse database: {}", e)))?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).map_err(|e| {
                        Error::Persistence(format!("failed to create database directory: {}", e))
                    })?;
                }
            }
            DatabaseState::default()
        };

        debug!(path = ?path, "Opened checkpoint database");

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Create an in-memory database (useful for testing)
    pub fn open_memory() -> Self {
        Self {
            path: PathBuf::new(),
            state: Arc::new(RwLock::new(DatabaseState::default())),
        }
    }

    /// Create a persister for the given scope. Scopes do not see each
    /// other's keys.
    pub fn persister(&self, scope: impl Into<String>) -> JsonFilePersister {
        JsonFilePersister {
            db: self.clone(),
            scope: scope.into(),
        }
    }

    fn is_memory(&self) -> bool {
        self.path.as_os_str().is_empty()
    }
}

/// A persister backed by a JSON file, scoped to one consumer
#[derive(Clone)]
pub struct JsonFilePersister {
    db: JsonFileDatabase,
    scope: String,
}

impl JsonFilePersister {
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl Persister for JsonFilePersister {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let state = self
            .db
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        let value = match state.scopes.get(&self.scope).and_then(|s| s.get(key)) {
            Some(v) => v,
            None => return Ok(None),
        };

        match value {
            Value::String(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(|e| Error::Persistence(format!("invalid base64 value for '{}': {}", key, e))),
            other => Ok(Some(serde_json::to_vec(other)?)),
        }
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let stored = match serde_json::from_slice::<Value>(&value) {
            Ok(v @ (Value::Object(_) | Value::Array(_))) => v,
            _ => Value::String(STANDARD.encode(&value)),
        };

        let mut state = self
            .db
            .state
            .write()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        let previous = state
            .scopes
            .entry(self.scope.clone())
            .or_default()
            .insert(key.to_string(), stored);

        if self.db.is_memory() {
            return Ok(());
        }

        // Written under the lock so concurrent scopes cannot reorder renames
        if let Err(e) = atomic_write(&self.db.path, &state) {
            // Roll back so memory never holds a value the file does not
            if let Some(scope) = state.scopes.get_mut(&self.scope) {
                match previous {
                    Some(v) => {
                        scope.insert(key.to_string(), v);
                    }
                    None => {
                        scope.remove(key);
                    }
                }
            }
            return Err(e);
        }

        Ok(())
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, state: &DatabaseState) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Process ID plus a counter keeps temp names unique across threads
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Persistence(format!("failed to write database: {}", e)))?;

    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush database: {}", e)))?;

    // Close the file handle before rename
    drop(writer);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::Persistence(format!(
            "failed to rename database file: {}",
            e
        )));
    }

    Ok(())
}
