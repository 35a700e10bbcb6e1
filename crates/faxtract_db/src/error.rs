//! Error types for the record store.

use thiserror::Error;

/// Record store operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Record store errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(sqlx::Error),

    /// Unique-index violation on insert. The caller should resolve to the
    /// winning row via `find_by_hash`.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state transition or inconsistent row
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization error for JSON columns
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Duplicate(db_err.message().to_string());
            }
        }
        Self::Sqlx(err)
    }
}

impl DbError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}
