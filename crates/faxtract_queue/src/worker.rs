//! In-process worker pool.
//!
//! Each worker claims one job at a time from the durable queue, fetches
//! the source bytes, and drives the pipeline under the job's soft
//! deadline. Workers hold no shared locks across external calls; the only
//! shared mutable state is the record store itself.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use faxtract_db::{ClaimedJob, FaxtractDb};
use faxtract_pipeline::{Pipeline, PipelineOutcome, PipelineRequest, ProgressFn};
use faxtract_protocol::config::PipelineConfig;
use faxtract_protocol::errors::{ErrorKind, PipelineError};
use faxtract_protocol::types::{Document, JobId};
use faxtract_store::{ObjectStore, StoreError};

use crate::cancel::CancellationToken;
use crate::queue::{JobPayload, JobSource};

/// Claim backoff when the queue is empty.
const CLAIM_BACKOFF_BASE_MS: u64 = 50;
/// Claim backoff cap.
const CLAIM_BACKOFF_MAX_MS: u64 = 1_000;

fn from_store(err: StoreError) -> PipelineError {
    match err {
        StoreError::NotFound(key) => PipelineError::NotFound(key),
        err => PipelineError::StoreTransient(err.to_string()),
    }
}

/// Spawns and coordinates the worker tasks.
#[derive(Clone)]
pub struct WorkerPool {
    db: FaxtractDb,
    pipeline: Arc<Pipeline>,
    config: Arc<PipelineConfig>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        db: FaxtractDb,
        pipeline: Arc<Pipeline>,
        config: Arc<PipelineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            pipeline,
            config,
            cancel,
        }
    }

    /// Spawn `worker_concurrency` tasks. Each processes one document at a
    /// time until cancelled.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        (0..self.config.worker_concurrency.max(1))
            .map(|index| {
                let pool = self.clone();
                tokio::spawn(async move { pool.worker_loop(index).await })
            })
            .collect()
    }

    /// Process queued jobs inline until the queue is empty. Returns how
    /// many jobs ran. Used by the synchronous CLI paths and tests.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            match self.db.claim_next_job().await {
                Ok(Some(job)) => {
                    self.execute_job(job).await;
                    processed += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "claim failed while draining");
                    break;
                }
            }
        }
        processed
    }

    async fn worker_loop(&self, index: usize) {
        info!(worker = index, "worker started");
        let mut backoff_ms = CLAIM_BACKOFF_BASE_MS;

        while !self.cancel.is_cancelled() {
            match self.db.claim_next_job().await {
                Ok(Some(job)) => {
                    backoff_ms = CLAIM_BACKOFF_BASE_MS;
                    self.execute_job(job).await;
                }
                Ok(None) => {
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(CLAIM_BACKOFF_MAX_MS);
                }
                Err(err) => {
                    error!(worker = index, error = %err, "job claim failed");
                    tokio::time::sleep(Duration::from_millis(CLAIM_BACKOFF_MAX_MS)).await;
                }
            }
        }
        info!(worker = index, "worker stopped");
    }

    async fn execute_job(&self, job: ClaimedJob) {
        let job_id = job.job_id.clone();
        let payload: JobPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                let _ = self
                    .db
                    .fail_job(
                        &job_id,
                        ErrorKind::Internal.as_str(),
                        &format!("undecodable job payload: {err}"),
                    )
                    .await;
                return;
            }
        };

        let timeout_s = if job.parent_batch_id.is_some() {
            self.config.batch_child_timeout_s
        } else {
            self.config.single_timeout_s
        };

        let run = self.run_payload(&job_id, payload);
        match tokio::time::timeout(Duration::from_secs(timeout_s), run).await {
            Ok(Ok(outcome)) => {
                let _ = self
                    .db
                    .complete_job(&job_id, &outcome_summary(&outcome))
                    .await;
            }
            Ok(Err(err)) => {
                let _ = self
                    .db
                    .fail_job(&job_id, err.kind().as_str(), &err.to_string())
                    .await;
            }
            Err(_) => {
                // Partially written artifacts stay for the sweeper.
                warn!(job_id = %job_id, timeout_s, "pipeline deadline exceeded");
                let _ = self
                    .db
                    .fail_job(
                        &job_id,
                        ErrorKind::Timeout.as_str(),
                        &format!("deadline exceeded after {timeout_s} s"),
                    )
                    .await;
            }
        }
    }

    async fn run_payload(
        &self,
        job_id: &JobId,
        payload: JobPayload,
    ) -> Result<PipelineOutcome, PipelineError> {
        let ctx = self.pipeline.context();
        let (bytes, staged) = match payload.source {
            JobSource::Staged(staged) => {
                let bytes = ctx.store.get(&staged.source_key).await.map_err(from_store)?;
                (bytes, Some(staged))
            }
            JobSource::ObjectRef { key } => {
                let bytes = ctx.store.get(&key).await.map_err(from_store)?;
                (bytes, None)
            }
        };

        let document = Document::new(bytes, payload.filename, payload.mime);
        let progress = self.progress_fn(job_id.clone());
        self.pipeline
            .run(
                PipelineRequest {
                    document,
                    tenant_id: payload.tenant_id,
                    template_id: payload.template_id,
                    staged,
                },
                Some(progress),
            )
            .await
    }

    fn progress_fn(&self, job_id: JobId) -> ProgressFn {
        let db = self.db.clone();
        Arc::new(move |progress| {
            let db = db.clone();
            let job_id = job_id.clone();
            tokio::spawn(async move {
                if let Err(err) = db.set_job_progress(&job_id, progress).await {
                    warn!(job_id = %job_id, error = %err, "progress update failed");
                }
            });
        })
    }
}

fn outcome_summary(outcome: &PipelineOutcome) -> serde_json::Value {
    json!({
        "processing_id": outcome.record.processing_id,
        "duplicate": outcome.duplicate,
        "overall_confidence": outcome.record.overall_confidence,
        "classification": outcome.record.classification.as_str(),
        "source_path": outcome.record.source_path,
        "processed_path": outcome.record.processed_path,
        "low_confidence_fields": outcome
            .low_confidence_fields
            .iter()
            .map(|field| field.name.clone())
            .collect::<Vec<_>>(),
    })
}
