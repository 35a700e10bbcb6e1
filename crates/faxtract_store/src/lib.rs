//! Object store adapter.
//!
//! Blobs live in a two-tier layout keyed by tenant and confidence bucket;
//! the path grammar itself is owned by `faxtract_protocol::paths`. This
//! crate defines the storage seam and the local-filesystem backend.

mod error;
mod local;
mod object_store;

pub use error::{Result, StoreError};
pub use local::LocalObjectStore;
pub use object_store::{ObjectMeta, ObjectStore};
