//! Key/value blob storage used to persist guide snapshots

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::Result;

/// Byte blobs addressed by string key
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key under a directory
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// `<data dir>/guide_engine/store`, or `./guide_engine/store` when the
    /// platform has no data directory
    pub fn default_dir() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("guide_engine");
        path.push("store");
        path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<encoded key>.json`. Bytes outside `[A-Za-z0-9._-]` are
    /// percent-encoded so distinct keys never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len());
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.') {
                name.push(char::from(b));
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        self.dir.join(format!("{}.json", name))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        // Write then rename so readers never see a half-written snapshot
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// In-process store, mostly for tests and embedding without a disk
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(blobs.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryBlobStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", b"hello").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"hello".to_vec()));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("nested")).unwrap();

        assert_eq!(store.get("guide_engine.epg").unwrap(), None);
        store.set("guide_engine.epg", b"{}").unwrap();
        assert_eq!(store.get("guide_engine.epg").unwrap(), Some(b"{}".to_vec()));
        assert!(store.dir().join("guide_engine.epg.json").exists());

        store.remove("guide_engine.epg").unwrap();
        store.remove("guide_engine.epg").unwrap();
        assert_eq!(store.get("guide_engine.epg").unwrap(), None);
    }

    #[test]
    fn test_file_store_encodes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();
        store.set("@playcast/epg", b"x").unwrap();
        assert!(dir.path().join("%40playcast%2Fepg.json").exists());
        assert_eq!(store.get("@playcast/epg").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_similar_keys_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path()).unwrap();
        let keys = ["a/b", "a_b", "a:b", "a%2Fb", "a b"];
        for key in keys {
            store.set(key, key.as_bytes()).unwrap();
        }
        for key in keys {
            assert_eq!(store.get(key).unwrap(), Some(key.as_bytes().to_vec()));
        }

        store.remove("a/b").unwrap();
        assert_eq!(store.get("a/b").unwrap(), None);
        assert_eq!(store.get("a_b").unwrap(), Some(b"a_b".to_vec()));
    }
}
