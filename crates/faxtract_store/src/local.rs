//! Local-filesystem object store backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::object_store::{ObjectMeta, ObjectStore};

/// Object store rooted at a local directory.
///
/// Logical keys map 1:1 onto relative paths under the root. Puts go
/// through a sibling temp file plus rename, which is atomic per object on
/// POSIX filesystems.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed and return the store.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root).await?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::invalid_key("empty key"));
        }
        if key.starts_with('/') {
            return Err(StoreError::invalid_key(format!("absolute key: {key}")));
        }
        for segment in key.split('/') {
            if segment == ".." {
                return Err(StoreError::invalid_key(format!("traversal in key: {key}")));
            }
        }
        Ok(self.root.join(key))
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut key = String::new();
        for component in rel.components() {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&component.as_os_str().to_string_lossy());
        }
        Some(key)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Temp file in the same directory so the rename stays on one
        // filesystem and replaces the target atomically. The suffix is
        // appended, not swapped in for an extension, so sibling keys
        // never share a temp path.
        let mut tmp = target.clone().into_os_string();
        tmp.push(".tmp-write");
        let tmp = std::path::PathBuf::from(tmp);
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &target).await?;
        debug!(key = path, size = bytes.len(), "object written");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(path))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut entries = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = read_dir.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Some(key) = self.key_of(&path) else {
                    continue;
                };
                // In-flight temp files are not objects.
                if key.ends_with(".tmp-write") || !key.starts_with(prefix) {
                    continue;
                }
                let meta = entry.metadata().await?;
                let last_modified: DateTime<Utc> = meta
                    .modified()
                    .map(DateTime::from)
                    .unwrap_or_else(|_| Utc::now());
                entries.push(ObjectMeta {
                    path: key,
                    size: meta.len(),
                    last_modified,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn move_object(&self, src: &str, dst: &str) -> Result<()> {
        if src == dst {
            return Ok(());
        }
        let bytes = self.get(src).await?;
        self.put(dst, &bytes, "application/octet-stream").await?;
        self.delete(src).await?;
        debug!(src, dst, "object moved");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        Ok(fs::try_exists(&target).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_get_roundtrip_and_overwrite() {
        let (_dir, store) = store().await;
        store.put("a/b/c.bin", b"first", "application/pdf").await.unwrap();
        store.put("a/b/c.bin", b"second", "application/pdf").await.unwrap();
        assert_eq!(store.get("a/b/c.bin").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_dir, store) = store().await;
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_sorts() {
        let (_dir, store) = store().await;
        store.put("tier/source/t1/x", b"1", "").await.unwrap();
        store.put("tier/source/t1/a", b"22", "").await.unwrap();
        store.put("tier/processed/t1/y", b"3", "").await.unwrap();

        let listed = store.list("tier/source/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(keys, vec!["tier/source/t1/a", "tier/source/t1/x"]);
        assert_eq!(listed[0].size, 2);
    }

    #[tokio::test]
    async fn move_is_copy_then_delete() {
        let (_dir, store) = store().await;
        store.put("src/file", b"payload", "").await.unwrap();
        store.move_object("src/file", "dst/file").await.unwrap();
        assert!(!store.exists("src/file").await.unwrap());
        assert_eq!(store.get("dst/file").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn move_same_path_is_noop() {
        let (_dir, store) = store().await;
        store.put("same", b"x", "").await.unwrap();
        store.move_object("same", "same").await.unwrap();
        assert_eq!(store.get("same").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let (_dir, store) = store().await;
        store.delete("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn traversal_keys_rejected() {
        let (_dir, store) = store().await;
        let err = store.put("../escape", b"x", "").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        let err = store.get("/absolute").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
