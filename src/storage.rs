//! Object storage for visualizer bundles and derived files.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};

/// Named byte blobs keyed by slash-separated paths.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn exists(&self, key: &str) -> Result<bool>;
    fn delete(&self, key: &str) -> Result<()>;
    /// Delete every key under `prefix/`. Returns how many were removed.
    fn delete_prefix(&self, prefix: &str) -> Result<usize>;
    /// Public URL a browser can fetch the blob from.
    fn url(&self, key: &str) -> String;

    /// Copy a blob to a new key. Returns `false` if the source is missing.
    fn copy(&self, from: &str, to: &str) -> Result<bool> {
        match self.get(from)? {
            Some(bytes) => {
                self.put(to, &bytes)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Storage key for a file inside a visualizer's hosted bundle.
pub fn bundle_key(shortname: &str, path: &str) -> String {
    format!("bundles/{}/{}", shortname, path.trim_start_matches('/'))
}

/// Storage prefix for everything a visualizer's bundle owns.
pub fn bundle_prefix(shortname: &str) -> String {
    format!("bundles/{}", shortname)
}

/// Storage key for a derived file.
pub fn processed_key(shortname: &str, resource_id: &str, filename: &str) -> String {
    format!("processed/{}/{}/{}", shortname, resource_id, filename)
}

pub fn processed_prefix(shortname: &str) -> String {
    format!("processed/{}", shortname)
}

/// Reject keys that would escape the storage root.
fn checked_relative(key: &str) -> Result<PathBuf> {
    let path = Path::new(key);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => bail!("Invalid storage key '{}'", key),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("Empty storage key");
    }
    Ok(out)
}

/// Stores blobs as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    base_url: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage dir {}", root.display()))?;
        Ok(Self {
            root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(checked_relative(key)?))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let dir = self.path_for(prefix)?;
        if !dir.is_dir() {
            return Ok(0);
        }
        let count = walkdir::WalkDir::new(&dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .count();
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete {}", dir.display()))?;
        Ok(count)
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

/// In-memory store. Clones share the same blobs.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs
            .lock()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn blobs(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|e| anyhow::anyhow!("Storage lock poisoned: {}", e))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        checked_relative(key)?;
        self.blobs()?.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs()?.get(key).cloned())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs()?.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.blobs()?.remove(key);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let mut blobs = self.blobs()?;
        let before = blobs.len();
        blobs.retain(|k, _| !k.starts_with(&dir));
        Ok(before - blobs.len())
    }

    fn url(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_keys_are_visualizer_scoped() {
        assert_eq!(bundle_key("cad", "/index.html"), "bundles/cad/index.html");
        assert_eq!(processed_key("office", "r1", "out.pdf"), "processed/office/r1/out.pdf");
    }

    #[test]
    fn test_fs_store_roundtrip_and_prefix_delete() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("storage"), "/storage/").unwrap();
        store.put("bundles/cad/index.html", b"<html>").unwrap();
        store.put("bundles/cad/js/app.js", b"app").unwrap();
        store.put("bundles/pdf/index.html", b"pdf").unwrap();

        assert_eq!(store.get("bundles/cad/js/app.js").unwrap().unwrap(), b"app");
        assert!(store.get("bundles/cad/missing").unwrap().is_none());
        assert_eq!(store.url("bundles/cad/index.html"), "/storage/bundles/cad/index.html");

        assert_eq!(store.delete_prefix("bundles/cad").unwrap(), 2);
        assert!(!store.exists("bundles/cad/index.html").unwrap());
        assert!(store.exists("bundles/pdf/index.html").unwrap());
    }

    #[test]
    fn test_fs_store_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "/s").unwrap();
        assert!(store.put("../outside", b"x").is_err());
        assert!(store.put("/etc/passwd", b"x").is_err());
    }

    #[test]
    fn test_memory_store_copy_and_prefix() {
        let store = MemoryObjectStore::new();
        store.put("processed/a/r1/out.pdf", b"pdf").unwrap();
        assert!(store.copy("processed/a/r1/out.pdf", "processed/a/r2/out.pdf").unwrap());
        assert!(!store.copy("processed/a/r9/out.pdf", "processed/a/r3/out.pdf").unwrap());
        assert_eq!(store.get("processed/a/r2/out.pdf").unwrap().unwrap(), b"pdf");
        assert_eq!(store.delete_prefix("processed/a").unwrap(), 2);
        assert!(store.keys().is_empty());
    }
}
