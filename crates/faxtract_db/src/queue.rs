//! Durable job rows.
//!
//! Atomic claiming via UPDATE ... WHERE state = 'QUEUED', same shape the
//! queue would take on PostgreSQL. Jobs are at-least-once; the record
//! store's unique content-hash index keeps replays idempotent.

use std::collections::HashSet;

use sqlx::Row;
use tracing::{debug, info};

use faxtract_protocol::types::{BatchId, ContentHash, JobId, JobKind, JobRecord, JobState, TenantId};

use crate::error::{DbError, Result};
use crate::models::{row_to_job, ClaimedJob, NewJob, QueueStats};
use crate::FaxtractDb;

impl FaxtractDb {
    pub async fn enqueue_job(&self, job: &NewJob) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        sqlx::query(
            r#"
            INSERT INTO fx_jobs (job_id, kind, state, payload, parent_batch_id, tenant_id, content_hash, created_at)
            VALUES (?, ?, 'QUEUED', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.job_id.as_str())
        .bind(job.kind.as_str())
        .bind(&payload)
        .bind(job.parent_batch_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(job.tenant_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(job.content_hash.as_ref().map(|h| h.as_str().to_string()))
        .bind(Self::now_millis())
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.job_id, kind = job.kind.as_str(), "job enqueued");
        Ok(())
    }

    /// Enqueue a batch of children in one transaction.
    pub async fn enqueue_jobs(&self, jobs: &[NewJob]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Self::now_millis();
        for job in jobs {
            let payload = serde_json::to_string(&job.payload)?;
            sqlx::query(
                r#"
                INSERT INTO fx_jobs (job_id, kind, state, payload, parent_batch_id, tenant_id, content_hash, created_at)
                VALUES (?, ?, 'QUEUED', ?, ?, ?, ?, ?)
                "#,
            )
            .bind(job.job_id.as_str())
            .bind(job.kind.as_str())
            .bind(&payload)
            .bind(job.parent_batch_id.as_ref().map(|id| id.as_str().to_string()))
            .bind(job.tenant_id.as_ref().map(|id| id.as_str().to_string()))
            .bind(job.content_hash.as_ref().map(|h| h.as_str().to_string()))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(count = jobs.len(), "batch enqueued");
        Ok(())
    }

    /// Insert a job row already in its terminal SUCCESS state. Used to
    /// record bulk-sweep cycles: the row is an audit entry, never
    /// claimable by a worker and invisible to backpressure depth.
    pub async fn record_completed_job(
        &self,
        job: &NewJob,
        result: &serde_json::Value,
    ) -> Result<()> {
        let payload = serde_json::to_string(&job.payload)?;
        let result_json = serde_json::to_string(result)?;
        let now = Self::now_millis();
        sqlx::query(
            r#"
            INSERT INTO fx_jobs (job_id, kind, state, progress, payload, result, tenant_id, created_at, started_at, finished_at)
            VALUES (?, ?, 'SUCCESS', 100, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.job_id.as_str())
        .bind(job.kind.as_str())
        .bind(&payload)
        .bind(&result_json)
        .bind(job.tenant_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomically claim the oldest queued job.
    pub async fn claim_next_job(&self) -> Result<Option<ClaimedJob>> {
        let mut tx = self.pool.begin().await?;

        let job_id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT job_id FROM fx_jobs
            WHERE state = 'QUEUED'
            ORDER BY created_at ASC, job_id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            tx.commit().await?;
            return Ok(None);
        };

        let affected = sqlx::query(
            r#"
            UPDATE fx_jobs
            SET state = 'RUNNING', started_at = ?
            WHERE job_id = ? AND state = 'QUEUED'
            "#,
        )
        .bind(Self::now_millis())
        .bind(&job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            // Claimed by another worker between the two statements.
            tx.commit().await?;
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM fx_jobs WHERE job_id = ?")
            .bind(&job_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let kind: String = row.try_get("kind").map_err(DbError::from)?;
        let payload: String = row.try_get("payload").map_err(DbError::from)?;
        let parent_batch_id: Option<String> =
            row.try_get("parent_batch_id").map_err(DbError::from)?;
        let tenant_id: Option<String> = row.try_get("tenant_id").map_err(DbError::from)?;
        let content_hash: Option<String> = row.try_get("content_hash").map_err(DbError::from)?;

        let claimed = ClaimedJob {
            job_id: JobId::parse(&job_id).map_err(|e| DbError::invalid_state(e.to_string()))?,
            kind: JobKind::parse(&kind)
                .ok_or_else(|| DbError::invalid_state(format!("unknown job kind: {kind}")))?,
            payload: serde_json::from_str(&payload)?,
            parent_batch_id: parent_batch_id
                .map(|id| BatchId::parse(&id).map_err(|e| DbError::invalid_state(e.to_string())))
                .transpose()?,
            tenant_id: tenant_id.map(TenantId::new),
            content_hash: content_hash.map(ContentHash::from_hex),
            result_ignored: row.try_get::<i64, _>("result_ignored").map_err(DbError::from)? != 0,
        };

        debug!(job_id = %claimed.job_id, "job claimed");
        Ok(Some(claimed))
    }

    pub async fn set_job_progress(&self, job_id: &JobId, progress: u8) -> Result<()> {
        sqlx::query("UPDATE fx_jobs SET progress = ? WHERE job_id = ?")
            .bind(progress.min(100) as i64)
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete_job(&self, job_id: &JobId, result: &serde_json::Value) -> Result<()> {
        let result_json = serde_json::to_string(result)?;
        sqlx::query(
            r#"
            UPDATE fx_jobs
            SET state = 'SUCCESS', progress = 100, result = ?, finished_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(&result_json)
        .bind(Self::now_millis())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        info!(job_id = %job_id, "job completed");
        Ok(())
    }

    pub async fn fail_job(&self, job_id: &JobId, error_kind: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE fx_jobs
            SET state = 'FAILED', error = ?, error_kind = ?, finished_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(error)
        .bind(error_kind)
        .bind(Self::now_millis())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        info!(job_id = %job_id, error_kind, "job failed");
        Ok(())
    }

    /// Cancellation: the pipeline still runs to completion, only the
    /// result is suppressed. Returns false for already-terminal jobs.
    pub async fn mark_result_ignored(&self, job_id: &JobId) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE fx_jobs
            SET result_ignored = 1
            WHERE job_id = ? AND state IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected > 0)
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM fx_jobs WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_jobs(&self, job_ids: &[JobId]) -> Result<Vec<JobRecord>> {
        let mut jobs = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(job) = self.get_job(job_id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    pub async fn list_batch_jobs(&self, batch_id: &BatchId) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM fx_jobs WHERE parent_batch_id = ? ORDER BY created_at ASC, job_id ASC",
        )
        .bind(batch_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM fx_jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(DbError::from)?;
            let count: i64 = row.try_get("n").map_err(DbError::from)?;
            match JobState::parse(&state) {
                Some(JobState::Queued) => stats.queued = count,
                Some(JobState::Running) => stats.running = count,
                Some(JobState::Success) => stats.success = count,
                Some(JobState::Failed) => stats.failed = count,
                None => {}
            }
        }
        Ok(stats)
    }

    /// Content hashes of jobs not yet terminal. The sweeper skips these.
    pub async fn in_flight_content_hashes(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            "SELECT content_hash FROM fx_jobs WHERE state IN ('QUEUED', 'RUNNING') AND content_hash IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("content_hash").map_err(DbError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_job(kind: JobKind, hash: Option<&str>) -> NewJob {
        NewJob {
            job_id: JobId::new(),
            kind,
            payload: json!({"source_key": "k"}),
            parent_batch_id: None,
            tenant_id: Some(TenantId::new("t1")),
            content_hash: hash.map(ContentHash::from_hex),
        }
    }

    #[tokio::test]
    async fn claim_is_fifo_and_single_winner() {
        let db = FaxtractDb::in_memory().await.unwrap();
        let first = new_job(JobKind::Single, Some("h1"));
        let second = new_job(JobKind::Single, Some("h2"));
        db.enqueue_job(&first).await.unwrap();
        db.enqueue_job(&second).await.unwrap();

        let claimed = db.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.job_id, first.job_id);

        let claimed = db.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.job_id, second.job_id);

        assert!(db.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lifecycle_and_stats() {
        let db = FaxtractDb::in_memory().await.unwrap();
        let job = new_job(JobKind::Single, None);
        db.enqueue_job(&job).await.unwrap();
        db.claim_next_job().await.unwrap().unwrap();
        db.set_job_progress(&job.job_id, 50).await.unwrap();

        let running = db.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(running.state, JobState::Running);
        assert_eq!(running.progress, 50);

        db.complete_job(&job.job_id, &json!({"processing_id": "p"}))
            .await
            .unwrap();
        let done = db.get_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Success);
        assert_eq!(done.progress, 100);

        let stats = db.queue_stats().await.unwrap();
        assert_eq!(stats.success, 1);
        assert_eq!(stats.depth(), 0);
    }

    #[tokio::test]
    async fn cancel_only_marks_live_jobs() {
        let db = FaxtractDb::in_memory().await.unwrap();
        let job = new_job(JobKind::Single, None);
        db.enqueue_job(&job).await.unwrap();
        assert!(db.mark_result_ignored(&job.job_id).await.unwrap());

        db.claim_next_job().await.unwrap().unwrap();
        db.fail_job(&job.job_id, "TIMEOUT", "deadline exceeded")
            .await
            .unwrap();
        assert!(!db.mark_result_ignored(&job.job_id).await.unwrap());
    }

    #[tokio::test]
    async fn batch_children_listed_in_order() {
        let db = FaxtractDb::in_memory().await.unwrap();
        let batch_id = BatchId::new();
        let jobs: Vec<NewJob> = (0..3)
            .map(|i| NewJob {
                parent_batch_id: Some(batch_id.clone()),
                content_hash: Some(ContentHash::from_hex(format!("h{i}"))),
                ..new_job(JobKind::Single, None)
            })
            .collect();
        db.enqueue_jobs(&jobs).await.unwrap();

        let children = db.list_batch_jobs(&batch_id).await.unwrap();
        assert_eq!(children.len(), 3);

        let in_flight = db.in_flight_content_hashes().await.unwrap();
        assert!(in_flight.contains("h0") && in_flight.contains("h2"));
    }
}
