//! Error types for the object store layer.

use thiserror::Error;

/// Object store operation result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Object store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO failure. Treated as transient by callers that retry.
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No object at the given key.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Key rejected by the adapter (traversal, empty, absolute).
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }

    /// Whether a retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
