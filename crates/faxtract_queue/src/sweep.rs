//! Periodic sweep over the watched object-store prefix.
//!
//! Files dropped outside the API are hashed, filtered against the record
//! store and the in-flight jobs, and fed into the same pipeline as API
//! uploads. No consumed-marker is written; the unique content-hash index
//! is the sole idempotency source.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use faxtract_db::{FaxtractDb, NewJob};
use faxtract_protocol::config::PipelineConfig;
use faxtract_protocol::errors::PipelineError;
use faxtract_protocol::types::{ContentHash, JobId, JobKind, SupportedMime, TenantId};
use faxtract_store::ObjectStore;

use crate::cancel::CancellationToken;
use crate::queue::{from_db, JobPayload, JobQueue, JobSource};

/// What one sweep cycle did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub listed: usize,
    pub enqueued: usize,
    pub skipped_known: usize,
    pub skipped_in_flight: usize,
    pub skipped_unreadable: usize,
    /// Backpressure held the cycle back entirely.
    pub paused: bool,
}

/// The bulk-sweep job.
pub struct Sweeper {
    db: FaxtractDb,
    store: Arc<dyn ObjectStore>,
    queue: JobQueue,
    config: Arc<PipelineConfig>,
    cancel: CancellationToken,
    paused: AtomicBool,
}

impl Sweeper {
    pub fn new(
        db: FaxtractDb,
        store: Arc<dyn ObjectStore>,
        queue: JobQueue,
        config: Arc<PipelineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            store,
            queue,
            config,
            cancel,
            paused: AtomicBool::new(false),
        }
    }

    /// Run forever on the configured interval. Cancellation takes effect
    /// between iterations, never mid-iteration.
    pub async fn run_periodic(&self) {
        let interval = Duration::from_secs(self.config.sweep_interval_s.max(1));
        info!(
            prefix = %self.config.sweep_prefix,
            interval_s = interval.as_secs(),
            "sweeper started"
        );
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.sweep_once().await {
                Ok(report) => {
                    info!(
                        listed = report.listed,
                        enqueued = report.enqueued,
                        paused = report.paused,
                        "sweep cycle complete"
                    );
                }
                Err(err) => warn!(error = %err, "sweep cycle failed"),
            }
            tokio::time::sleep(interval).await;
        }
        info!("sweeper stopped");
    }

    /// One full pass over the sweep prefix.
    pub async fn sweep_once(&self) -> Result<SweepReport, PipelineError> {
        let mut report = SweepReport::default();

        if self.backpressured().await? {
            report.paused = true;
            return Ok(report);
        }

        let objects = self
            .store
            .list(&self.config.sweep_prefix)
            .await
            .map_err(|err| PipelineError::StoreTransient(err.to_string()))?;
        report.listed = objects.len();

        let known = self.db.known_content_hashes().await.map_err(from_db)?;
        let in_flight = self.db.in_flight_content_hashes().await.map_err(from_db)?;
        let mut seen_this_cycle: HashSet<String> = HashSet::new();

        for object in objects {
            let bytes = match self.store.get(&object.path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(key = %object.path, error = %err, "unreadable sweep object");
                    report.skipped_unreadable += 1;
                    continue;
                }
            };
            let content_hash = ContentHash::of(&bytes);

            if known.contains(content_hash.as_str()) {
                report.skipped_known += 1;
                continue;
            }
            if in_flight.contains(content_hash.as_str())
                || seen_this_cycle.contains(content_hash.as_str())
            {
                report.skipped_in_flight += 1;
                continue;
            }

            let payload = self.payload_for(&object.path, content_hash.clone());
            match self.queue.enqueue_single(payload).await {
                Ok(_) => {
                    seen_this_cycle.insert(content_hash.as_str().to_string());
                    report.enqueued += 1;
                }
                Err(PipelineError::Busy) => {
                    // High water hit mid-cycle; stop and stay paused until
                    // the depth drains below the low-water mark.
                    self.paused.store(true, Ordering::SeqCst);
                    report.paused = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        self.record_cycle(&report).await;
        Ok(report)
    }

    /// Audit entry for the cycle, as a terminal bulk_sweep job row.
    async fn record_cycle(&self, report: &SweepReport) {
        let job = NewJob {
            job_id: JobId::new(),
            kind: JobKind::BulkSweep,
            payload: serde_json::json!({ "prefix": self.config.sweep_prefix }),
            parent_batch_id: None,
            tenant_id: None,
            content_hash: None,
        };
        let result = match serde_json::to_value(report) {
            Ok(value) => value,
            Err(_) => serde_json::Value::Null,
        };
        if let Err(err) = self.db.record_completed_job(&job, &result).await {
            warn!(error = %err, "failed to record sweep cycle");
        }
    }

    /// Paused at high water; resumes once depth drops below low water.
    async fn backpressured(&self) -> Result<bool, PipelineError> {
        let depth = self.queue.depth().await?;
        if self.paused.load(Ordering::SeqCst) {
            if depth < self.config.queue_low_water as i64 {
                self.paused.store(false, Ordering::SeqCst);
                return Ok(false);
            }
            return Ok(true);
        }
        if depth >= self.config.queue_high_water as i64 {
            self.paused.store(true, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(false)
    }

    /// Sweep keys follow `{prefix}{tenant_id}/{filename}`; files dropped
    /// without a tenant segment land under the default tenant.
    fn payload_for(&self, key: &str, content_hash: ContentHash) -> JobPayload {
        let relative = key
            .strip_prefix(self.config.sweep_prefix.as_str())
            .unwrap_or(key);
        let mut segments = relative.split('/').filter(|s| !s.is_empty());
        let first = segments.next().unwrap_or("default");
        let rest: Vec<&str> = segments.collect();
        let (tenant, filename) = if rest.is_empty() {
            ("default", first)
        } else {
            (first, *rest.last().unwrap_or(&first))
        };

        JobPayload {
            tenant_id: TenantId::new(tenant),
            filename: filename.to_string(),
            mime: SupportedMime::from_filename(filename),
            template_id: None,
            source: JobSource::ObjectRef {
                key: key.to_string(),
            },
            content_hash,
        }
    }
}
