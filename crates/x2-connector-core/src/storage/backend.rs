use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::StorageError;

/// Application name used for the cache directory path
const APP_NAME: &str = "x2-connector";

/// Storage file name in the cache directory
const STORAGE_FILE: &str = "storage.json";

/// A string key/value store. Implementations must be safe to share
/// between the facade and the timer tasks.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Apply several changes as one write: `Some` sets a key, `None`
    /// removes it. Either all changes land or none do.
    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), StorageError>;
}

fn apply_changes(entries: &mut HashMap<String, String>, changes: &[(&str, Option<&str>)]) -> bool {
    let mut changed = false;
    for (key, value) in changes {
        changed |= match value {
            Some(value) => entries.insert(key.to_string(), value.to_string()).as_deref() != Some(*value),
            None => entries.remove(*key).is_some(),
        };
    }
    changed
}

/// Session-scoped storage: lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }

    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
        apply_changes(&mut self.entries(), changes);
        Ok(())
    }
}

/// Local storage that survives restarts: a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary file and a
/// rename, so a reader never observes a half-written value.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Backend stored under the user cache directory.
    pub fn in_cache_dir() -> Result<Self, StorageError> {
        let cache_dir = dirs::cache_dir().ok_or(StorageError::NoCacheDir)?;
        Ok(Self::new(cache_dir.join(APP_NAME).join(STORAGE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, keys = entries.len(), "Storage file written");
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut HashMap<String, String>) -> bool,
    {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries = self.read_all()?;
        if f(&mut entries) {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| entries.remove(key).is_some())
    }

    fn apply(&self, changes: &[(&str, Option<&str>)]) -> Result<(), StorageError> {
        self.update(|entries| apply_changes(entries, changes))
    }
}
