//! Record store for Faxtract.
//!
//! SQLite via sqlx. Authoritative for record *metadata*; the object store
//! is authoritative for bytes. Also holds the durable job rows consumed by
//! the queue crate, null-field telemetry, and template metadata.
//!
//! # Example
//!
//! ```rust,ignore
//! use faxtract_db::FaxtractDb;
//!
//! let db = FaxtractDb::connect("sqlite:state.sqlite?mode=rwc").await?;
//! let record = db.find_by_hash(&hash).await?;
//! ```

pub mod error;
pub mod models;
mod null_fields;
mod queue;
mod records;
mod schema;
mod templates;

pub use error::{DbError, Result};
pub use models::{ClaimedJob, NewJob, QueueStats, RecordFilters, TemplateRow};

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Handle over the SQLite pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FaxtractDb {
    pool: SqlitePool,
}

impl FaxtractDb {
    /// Connect and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
