//! Database schema creation for all Faxtract tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use tracing::info;

use crate::error::Result;
use crate::FaxtractDb;

impl FaxtractDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL mode for better concurrent access
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_record_tables().await?;
        self.create_job_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_record_tables(&self) -> Result<()> {
        // Processed records: one row per distinct content hash
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS fx_processed_records (
                processing_id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL UNIQUE,
                tenant_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                source_path TEXT NOT NULL,
                processed_path TEXT NOT NULL,
                kv_pairs TEXT NOT NULL DEFAULT '{}',
                kv_confidences TEXT NOT NULL DEFAULT '{}',
                ocr_confidence REAL NOT NULL DEFAULT 0,
                overall_confidence REAL NOT NULL DEFAULT 0,
                classification TEXT NOT NULL DEFAULT 'Other',
                raw_text TEXT,
                positioning_data TEXT,
                template_id TEXT,
                template_mapping TEXT,
                extract_fallback INTEGER NOT NULL DEFAULT 0,
                has_corrections INTEGER NOT NULL DEFAULT 0,
                last_corrected_by TEXT,
                last_corrected_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Null-field telemetry: exactly one row per completed record
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS fx_null_field_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                processing_id TEXT NOT NULL UNIQUE,
                tenant_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                null_field_names TEXT NOT NULL DEFAULT '[]',
                all_extracted_fields TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Template metadata; uploads are immutable, deletion tombstones
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS fx_templates (
                template_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                fields TEXT NOT NULL DEFAULT '[]',
                object_key TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                deleted_at INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_tenant ON fx_processed_records(tenant_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_null_fields_tenant ON fx_null_field_records(tenant_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_templates_tenant ON fx_templates(tenant_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_job_tables(&self) -> Result<()> {
        // Durable job queue
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS fx_jobs (
                job_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'QUEUED',
                progress INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL DEFAULT '{}',
                result TEXT,
                error TEXT,
                error_kind TEXT,
                parent_batch_id TEXT,
                tenant_id TEXT,
                content_hash TEXT,
                result_ignored INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state ON fx_jobs(state, created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_batch ON fx_jobs(parent_batch_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_hash ON fx_jobs(content_hash)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
