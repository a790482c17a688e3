//! Persistence adapter: durable key/value storage for the state record.
//!
//! The store calls [`StateStorage::load`] once at startup and
//! [`StateStorage::save`] after every persisted mutation. Two backends ship
//! with the crate: [`FileStorage`] keeps one JSON file per key on disk and
//! [`MemoryStorage`] keeps values in process.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::PersistenceError;

/// Durable key/value storage used by the state store.
///
/// Implementations are called from the store's actor thread, one call at a
/// time, so they may block briefly.
pub trait StateStorage: Send + Sync + 'static {
    /// Load the value stored under `key`.
    ///
    /// # Returns
    ///
    /// `Ok(None)` if nothing has been stored under `key` yet.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the backend cannot be read or the
    /// stored bytes are not valid JSON.
    fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the value cannot be written.
    fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError>;
}

/// File-backed storage: `<dir>/<key>.json`.
///
/// Writes go to `<key>.json.tmp` first and are renamed into place, so
/// readers never see a partially written file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a storage rooted at `dir`. The directory is created lazily on
    /// the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StateStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(value)?;
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

/// In-process storage.
///
/// `Clone` shares the underlying map, so a test can keep a clone and inspect
/// what the store wrote, or seed a record before the engine starts.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-seeded with `value` under `key`.
    pub fn with_entry(key: impl Into<String>, value: Value) -> Self {
        let storage = Self::new();
        storage.lock().insert(key.into(), value);
        storage
    }

    /// Current value under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        // A panic while holding this lock cannot leave the map half-written.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), PersistenceError> {
        self.lock().insert(key.to_owned(), value.clone());
        Ok(())
    }
}
