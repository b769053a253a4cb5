//! Persisted pipeline state.
//!
//! The pipeline keeps two values per project: the last known remote
//! snapshot and the sticky host. Both go through a [`StateStore`] so tests
//! can run entirely in memory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Key/value storage for pipeline state.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> SyncResult<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> SyncResult<()>;

    /// Returns `true` if the key existed.
    fn remove(&self, key: &str) -> SyncResult<bool>;
}

/// Typed access on top of any [`StateStore`].
pub trait StateStoreExt: StateStore {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| SyncError::Store(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    fn set_as<T: Serialize>(&self, key: &str, value: &T) -> SyncResult<()> {
        let value = serde_json::to_value(value).map_err(|e| SyncError::Store(format!("{key}: {e}")))?;
        self.set(key, value)
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

pub fn snapshot_key(project_id: &str) -> String {
    format!("snapshot/{project_id}")
}

pub fn host_key(project_id: &str) -> String {
    format!("host/{project_id}")
}

fn poisoned<E: std::fmt::Display>(e: E) -> SyncError {
    SyncError::Store(format!("lock poisoned: {e}"))
}

/// State held in memory only.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        self.values.write().map_err(poisoned)?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<bool> {
        Ok(self.values.write().map_err(poisoned)?.remove(key).is_some())
    }
}

/// State kept in a single JSON file.
///
/// Every write rewrites the whole file through a temporary file in the same
/// directory, so a crash never leaves a half-written state file behind.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SyncError::Store(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, Value>) -> SyncResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, values)
            .map_err(|e| SyncError::Store(e.to_string()))?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| SyncError::Io(e.error))?;
        debug!(path = %self.path.display(), keys = values.len(), "state saved");
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.values.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> SyncResult<()> {
        let mut values = self.values.write().map_err(poisoned)?;
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> SyncResult<bool> {
        let mut values = self.values.write().map_err(poisoned)?;
        let existed = values.remove(key).is_some();
        if existed {
            self.flush(&values)?;
        }
        Ok(existed)
    }
}
