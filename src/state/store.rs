//! Persistence backends for the flow registry.
//!
//! The engine saves its whole index under one key after every mutation and
//! loads it once at construction. Stores encode values as JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Result, SteadyflowError};

/// Key/value persistence used by the engine.
///
/// Both operations are synchronous. A `save` must be atomic: a later `load`
/// sees either the previous value or the new one, never a partial write.
pub trait StateStore: Send + 'static {
    fn save<T: Serialize>(&self, key: &str, state: &T) -> Result<()>;

    /// Returns `Ok(None)` when nothing was saved under `key`.
    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>;
}

fn encode<T: Serialize>(key: &str, state: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(state).map_err(|source| SteadyflowError::StateEncode {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|source| SteadyflowError::StateDecode {
        key: key.to_string(),
        source,
    })
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Delete the value saved under `key`, if any.
    pub fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateStore for FileStateStore {
    /// Writes to a temp file, then renames it over the target.
    fn save<T: Serialize>(&self, key: &str, state: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let content = encode(key, state)?;
        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read(&path)?;
        decode(key, &content).map(Some)
    }
}

/// In-memory store. Clones share the same storage, so a store handed to one
/// engine can be reloaded by the next.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    values: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `key`, bypassing encoding.
    pub fn insert_raw(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.lock().insert(key.to_string(), bytes.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn save<T: Serialize>(&self, key: &str, state: &T) -> Result<()> {
        let bytes = encode(key, state)?;
        self.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let bytes = self.lock().get(key).cloned();
        bytes.map(|b| decode(key, &b)).transpose()
    }
}
