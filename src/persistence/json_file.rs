// SPDX-License-Identifier: Apache-2.0

//! JSON file-based persistence with atomic writes.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// State stored in the JSON file, one map of raw JSON values per scope
#[derive(Debug, Default, Serialize, Deserialize)]
struct DatabaseState {
    scopes: HashMap<String, HashMap<String, serde_json::Value>>,
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

        let state = match read_json::<DatabaseState>(&path)? {
            Some(state) => state,
            None => {
                ensure_parent(&path)?;
                DatabaseState::default()
            }
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Create a persister bound to one scope of the database
    pub fn persister(&self, scope: impl Into<String>) -> JsonFilePersister {
        JsonFilePersister {
            path: self.path.clone(),
            state: self.state.clone(),
            scope: scope.into(),
            cache: HashMap::new(),
        }
    }
}

/// A persister backed by a JSON file, scoped to a single owner.
///
/// Values are staged in a local cache and only reach the shared state (and disk)
/// on [`JsonFilePersister::sync`].
pub struct JsonFilePersister {
    path: PathBuf,
    state: Arc<RwLock<DatabaseState>>,
    scope: String,
    cache: HashMap<String, serde_json::Value>,
}

impl JsonFilePersister {
    /// Stage a value under `key`
    pub fn set_raw_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| Error::Persistence(format!("failed to serialize to JSON: {}", e)))?;
        self.cache.insert(key.to_string(), json_value);
        Ok(())
    }

    /// Returns Ok(None) if the key doesn't exist and Err if it exists but cannot be decoded
    pub fn try_get_raw_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> std::result::Result<Option<T>, serde_json::Error> {
        match self.cache.get(key) {
            None => Ok(None),
            Some(v) => serde_json::from_value(v.clone()).map(Some),
        }
    }

    /// Load this scope from the shared state into the cache
    pub fn load(&mut self) -> Result<()> {
        let state = self
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        self.cache.clear();
        if let Some(scope_data) = state.scopes.get(&self.scope) {
            self.cache
                .extend(scope_data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Ok(())
    }

    /// Write the cache back to the shared state and to disk.
    pub fn sync(&self) -> Result<()> {
        {
            let mut state = self
                .state
                .write()
                .map_err(|e| Error::Persistence(e.to_string()))?;

            let scope_data = state.scopes.entry(self.scope.clone()).or_default();
            scope_data.clear();
            for (key, value) in &self.cache {
                scope_data.insert(key.clone(), value.clone());
            }
        }

        let state = self
            .state
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))?;

        atomic_write_json(&self.path, &*state)
    }
}

/// Read and decode a JSON document.
///
/// Returns `Ok(None)` when the file does not exist and an error when it exists but
/// cannot be read or decoded; callers decide whether corruption is fatal.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Persistence(format!(
                "failed to open {}: {}",
                path.display(),
                e
            )));
        }
    };

    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| Error::Corrupt(path.to_path_buf(), e.to_string()))
}

/// Write a document atomically (write to temp, then rename)
pub fn atomic_write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    ensure_parent(path)?;

    // Process id plus counter keeps concurrent writers in one process apart
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    let written = serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| Error::Persistence(format!("failed to write document: {}", e)))
        .and_then(|_| {
            writer
                .flush()
                .map_err(|e| Error::Persistence(format!("failed to flush document: {}", e)))
        })
        .and_then(|_| {
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| Error::Persistence(format!("failed to sync document: {}", e)))
        });
    drop(writer);

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Persistence(format!("failed to rename {}: {}", path.display(), e))
    })
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }
    Ok(())
}
