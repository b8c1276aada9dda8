use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StorageError;

/// Raw string key/value store underneath one cache tier.
///
/// Implementations report failures; the tier adapters decide what to do with them.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// In-process store. Clones share the same map, so one instance can back several
/// controllers the way same-origin tabs share storage.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    map: Arc<RwLock<HashMap<String, String>>>,
    /// Per-value size limit in bytes (key + value), if any.
    max_value_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses values larger than `limit` bytes, like a cookie jar.
    pub fn with_quota(limit: usize) -> Self {
        Self { map: Arc::new(RwLock::new(HashMap::new())), max_value_bytes: Some(limit) }
    }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
    pub fn keys(&self) -> Vec<String> { self.map.read().keys().cloned().collect() }
    pub fn clear(&self) { self.map.write().clear(); }

    /// Raw access for callers that want to bypass the adapters (other code on the origin).
    pub fn raw_get(&self, key: &str) -> Option<String> { self.map.read().get(key).cloned() }
    pub fn raw_set(&self, key: &str, value: &str) { self.map.write().insert(key.to_string(), value.to_string()); }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(limit) = self.max_value_bytes {
            let bytes = key.len() + value.len();
            if bytes > limit {
                return Err(StorageError::QuotaExceeded { key: key.to_string(), bytes, limit });
            }
        }
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.map.write().remove(key);
        Ok(())
    }
}

/// Directory-backed store that survives restarts: one file per key.
#[derive(Clone, Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_filename(key)))
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        // write-then-rename so readers never observe a torn file
        let tmp = path.with_extension("json.tmp");
        let written = std::fs::write(&tmp, value.as_bytes()).and_then(|()| std::fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
