//! # Local Key Cache
//!
//! Persistent key-value store on the device holding serialized wrapped
//! private keys. Values are always password-wrapped; nothing stored here is
//! usable without the account secret.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LocalKeyCache                                                          │
//! │  • get(key)        - Read an entry (absence is Ok(None))               │
//! │  • put(key, value) - Create or overwrite                               │
//! │  • remove(key)     - Delete, reporting whether it existed              │
//! │                                                                         │
//! │  MemoryKeyCache    RwLock<HashMap>, for tests and ephemeral sessions   │
//! │  FileKeyCache      One file per key, written via temp file + rename    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Device-local store for wrapped private keys
pub trait LocalKeyCache: Send + Sync {
    /// Read an entry
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Create or overwrite an entry
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete an entry; returns whether it existed
    fn remove(&self, key: &str) -> Result<bool>;
}

/// In-memory cache
#[derive(Default)]
pub struct MemoryKeyCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKeyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl LocalKeyCache for MemoryKeyCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

/// File-backed cache, one file per key
pub struct FileKeyCache {
    dir: PathBuf,
}

impl FileKeyCache {
    /// Open (creating if needed) a cache rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::StorageWriteError(e.to_string()))?;
        Ok(Self { dir })
    }

    /// Directory holding the entries
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.key", sanitize(key)))
    }
}

/// Map a cache key to a file name
///
/// `[A-Za-z0-9_-]` pass through; every other byte becomes `%XX`, so distinct
/// keys never share a file and no key can escape the directory.
fn sanitize(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

impl LocalKeyCache for FileKeyCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StorageReadError(e.to_string())),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");

        fs::write(&tmp, value).map_err(|e| Error::StorageWriteError(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            Error::StorageWriteError(e.to_string())
        })
    }

    fn remove(&self, key: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::StorageWriteError(e.to_string())),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(cache: &dyn LocalKeyCache) {
        assert!(cache.get("flowsec-privatekey-u1").unwrap().is_none());

        cache.put("flowsec-privatekey-u1", "wrapped-1").unwrap();
        assert_eq!(
            cache.get("flowsec-privatekey-u1").unwrap().as_deref(),
            Some("wrapped-1")
        );

        cache.put("flowsec-privatekey-u1", "wrapped-2").unwrap();
        assert_eq!(
            cache.get("flowsec-privatekey-u1").unwrap().as_deref(),
            Some("wrapped-2")
        );

        assert!(cache.remove("flowsec-privatekey-u1").unwrap());
        assert!(!cache.remove("flowsec-privatekey-u1").unwrap());
        assert!(cache.get("flowsec-privatekey-u1").unwrap().is_none());
    }

    #[test]
    fn test_memory_cache() {
        let cache = MemoryKeyCache::new();
        exercise(&cache);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_file_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileKeyCache::open(dir.path().join("keys")).unwrap();
        exercise(&cache);
    }

    #[test]
    fn test_file_cache_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        FileKeyCache::open(dir.path()).unwrap().put("k", "v").unwrap();
        let reopened = FileKeyCache::open(dir.path()).unwrap();

        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_sanitize_keeps_keys_distinct() {
        assert_eq!(sanitize("privateKey_u1"), "privateKey_u1");
        assert_ne!(sanitize("a/b"), sanitize("a_b"));
        assert_ne!(sanitize("a.b"), sanitize("a%2Eb"));
        assert!(!sanitize("../../etc/passwd").contains('/'));
        assert!(!sanitize("../x").contains('.'));
    }

    #[test]
    fn test_file_cache_hostile_key_stays_inside() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileKeyCache::open(dir.path()).unwrap();

        cache.put("../escape", "v").unwrap();

        assert_eq!(cache.get("../escape").unwrap().as_deref(), Some("v"));
        assert!(!dir.path().parent().unwrap().join("escape.key").exists());
    }
}
