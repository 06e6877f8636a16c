//! Core KeyStore implementation

use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// A durable string-to-string map
///
/// Implementations must be safe to share between threads. Values are opaque
/// strings; callers own their encoding.
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`, returning whether it was present
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// All entries, ordered by key
    fn entries(&self) -> Result<BTreeMap<String, String>, StoreError>;
}

/// Store backed by a single JSON object file
///
/// Writes hold an exclusive advisory lock on a sibling `.lock` file and
/// replace the data file via rename, so readers never see a torn write.
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// Open or create a store at the given file path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let lock_path = sibling(&path, "lock");
        debug!(?path, "Opened file store");
        Ok(Self { path, lock_path })
    }

    /// Path of the data file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, exclusive: bool) -> Result<fs::File, StoreError> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| StoreError::io(&self.lock_path, e))?;

        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;

        Ok(file)
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let tmp_path = sibling(&self.path, "tmp");
        let content = serde_json::to_string_pretty(entries)?;
        if let Err(e) = fs::write(&tmp_path, content) {
            remove_temp_file(&tmp_path, &e);
            return Err(StoreError::io(&tmp_path, e));
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            remove_temp_file(&tmp_path, &e);
            return Err(StoreError::io(&self.path, e));
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<String, String>) -> R) -> Result<R, StoreError> {
        let guard = self.lock(false)?;
        let result = self.load().map(|entries| f(&entries));
        let _ = FileExt::unlock(&guard);
        result
    }

    fn update<R>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> R) -> Result<R, StoreError> {
        let guard = self.lock(true)?;
        let result = self.load().and_then(|mut entries| {
            let out = f(&mut entries);
            self.persist(&entries)?;
            Ok(out)
        });
        let _ = FileExt::unlock(&guard);
        result
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(|entries| entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })?;
        debug!(key, path = ?self.path, "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self.update(|entries| entries.remove(key).is_some())?;
        if removed {
            info!(key, "Removed key");
        }
        Ok(removed)
    }

    fn entries(&self) -> Result<BTreeMap<String, String>, StoreError> {
        self.read(|entries| entries.clone())
    }
}

/// `store.json` -> `store.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn remove_temp_file(tmp_path: &Path, cause: &io::Error) {
    if let Err(e) = fs::remove_file(tmp_path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %tmp_path.display(), cause = %cause, error = %e, "Failed to remove temp file");
    }
}
