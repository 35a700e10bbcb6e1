//! Storage seam for blob backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    /// Logical key relative to the store root.
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Blob storage operations.
///
/// Keys are logical, `/`-separated, and relative to the backend's root.
/// Writes are atomic at the object granularity; last writer wins.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object. Idempotent by path.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// Read an object's bytes.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// List objects under a key prefix, sorted by path.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Copy-then-delete move. A no-op when `src == dst`. On failure both
    /// objects may temporarily coexist; callers must tolerate that.
    async fn move_object(&self, src: &str, dst: &str) -> Result<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Whether an object exists at the key.
    async fn exists(&self, path: &str) -> Result<bool>;
}
