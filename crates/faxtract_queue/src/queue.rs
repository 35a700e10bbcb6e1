//! Job queue facade over the durable rows.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use faxtract_db::{DbError, FaxtractDb, NewJob, QueueStats};
use faxtract_pipeline::StagedSource;
use faxtract_protocol::config::PipelineConfig;
use faxtract_protocol::errors::PipelineError;
use faxtract_protocol::types::{
    BatchId, ContentHash, JobId, JobKind, JobRecord, JobState, SupportedMime, TemplateId, TenantId,
};

pub(crate) fn from_db(err: DbError) -> PipelineError {
    match err {
        DbError::Duplicate(msg) => PipelineError::Duplicate(msg),
        DbError::NotFound(msg) => PipelineError::NotFound(msg),
        err @ DbError::Sqlx(_) => PipelineError::StoreTransient(err.to_string()),
        err => PipelineError::internal(err.to_string()),
    }
}

/// Where a job's bytes live until the worker picks it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSource {
    /// The ingest path already wrote the source object under the grammar.
    Staged(StagedSource),
    /// An object already in the store, referenced in place: a file dropped
    /// under the sweep prefix, or an existing record's source for a
    /// duplicate re-submission.
    ObjectRef { key: String },
}

/// Serialized job body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub tenant_id: TenantId,
    pub filename: String,
    pub mime: SupportedMime,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    pub source: JobSource,
    pub content_hash: ContentHash,
}

/// Result of a batch enqueue.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSubmission {
    pub batch_id: BatchId,
    pub child_job_ids: Vec<JobId>,
}

/// Aggregate view over a batch's children.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub children: Vec<JobRecord>,
    /// Mean of child progress.
    pub aggregate_progress: u8,
    pub completed: usize,
    pub failed: usize,
}

impl BatchStatus {
    pub fn from_children(children: Vec<JobRecord>) -> Self {
        let total: u32 = children.iter().map(|job| job.progress as u32).sum();
        let aggregate_progress = if children.is_empty() {
            0
        } else {
            (total / children.len() as u32) as u8
        };
        let completed = children
            .iter()
            .filter(|job| job.state == JobState::Success)
            .count();
        let failed = children
            .iter()
            .filter(|job| job.state == JobState::Failed)
            .count();
        Self {
            children,
            aggregate_progress,
            completed,
            failed,
        }
    }

    /// The aggregate is final only once every child terminated.
    pub fn is_terminal(&self) -> bool {
        self.children.iter().all(|job| job.state.is_terminal())
    }
}

/// Durable queue facade with backpressure.
#[derive(Clone)]
pub struct JobQueue {
    db: FaxtractDb,
    config: Arc<PipelineConfig>,
}

impl JobQueue {
    pub fn new(db: FaxtractDb, config: Arc<PipelineConfig>) -> Self {
        Self { db, config }
    }

    /// Queue depth (non-terminal jobs).
    pub async fn depth(&self) -> Result<i64, PipelineError> {
        Ok(self.db.queue_stats().await.map_err(from_db)?.depth())
    }

    async fn reject_when_full(&self) -> Result<(), PipelineError> {
        if self.depth().await? >= self.config.queue_high_water as i64 {
            return Err(PipelineError::Busy);
        }
        Ok(())
    }

    pub async fn enqueue_single(&self, payload: JobPayload) -> Result<JobId, PipelineError> {
        self.reject_when_full().await?;
        let job_id = JobId::new();
        let job = NewJob {
            job_id: job_id.clone(),
            kind: JobKind::Single,
            payload: serde_json::to_value(&payload)
                .map_err(|err| PipelineError::internal(err.to_string()))?,
            parent_batch_id: None,
            tenant_id: Some(payload.tenant_id.clone()),
            content_hash: Some(payload.content_hash.clone()),
        };
        self.db.enqueue_job(&job).await.map_err(from_db)?;
        Ok(job_id)
    }

    /// Fan a batch out into child jobs under one batch id.
    pub async fn enqueue_batch(
        &self,
        payloads: Vec<JobPayload>,
    ) -> Result<BatchSubmission, PipelineError> {
        if payloads.is_empty() {
            return Err(PipelineError::validation("empty batch"));
        }
        self.reject_when_full().await?;

        let batch_id = BatchId::new();
        let jobs: Vec<NewJob> = payloads
            .iter()
            .map(|payload| {
                Ok(NewJob {
                    job_id: JobId::new(),
                    kind: JobKind::Batch,
                    payload: serde_json::to_value(payload)
                        .map_err(|err| PipelineError::internal(err.to_string()))?,
                    parent_batch_id: Some(batch_id.clone()),
                    tenant_id: Some(payload.tenant_id.clone()),
                    content_hash: Some(payload.content_hash.clone()),
                })
            })
            .collect::<Result<_, PipelineError>>()?;
        self.db.enqueue_jobs(&jobs).await.map_err(from_db)?;

        info!(batch_id = %batch_id, children = jobs.len(), "batch submitted");
        Ok(BatchSubmission {
            batch_id,
            child_job_ids: jobs.into_iter().map(|job| job.job_id).collect(),
        })
    }

    pub async fn get(&self, job_id: &JobId) -> Result<JobRecord, PipelineError> {
        self.db
            .get_job(job_id)
            .await
            .map_err(from_db)?
            .ok_or_else(|| PipelineError::not_found(format!("job {job_id}")))
    }

    pub async fn get_batch(&self, child_job_ids: &[JobId]) -> Result<BatchStatus, PipelineError> {
        let children = self.db.get_jobs(child_job_ids).await.map_err(from_db)?;
        Ok(BatchStatus::from_children(children))
    }

    /// Cancel: no mid-document abort; the result is suppressed instead so
    /// no bytes are orphaned.
    pub async fn cancel(&self, job_id: &JobId) -> Result<bool, PipelineError> {
        self.db.mark_result_ignored(job_id).await.map_err(from_db)
    }

    pub async fn stats(&self) -> Result<QueueStats, PipelineError> {
        self.db.queue_stats().await.map_err(from_db)
    }
}
