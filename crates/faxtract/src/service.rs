//! Ingress facade.
//!
//! The API collaborator hands every request here with a resolved tenant.
//! Handlers are short-lived: they validate, stage, and enqueue. Only the
//! synchronous single-document fast path runs the state machine in the
//! caller's context.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use faxtract_db::{QueueStats, RecordFilters};
use faxtract_extract::{FieldAnalysis, LowConfidenceField};
use faxtract_pipeline::{
    reanalyze_low_confidence, update_record_kv, DedupGate, DupCheck, Pipeline, PipelineContext,
    PipelineRequest, StagedSource,
};
use faxtract_protocol::errors::PipelineError;
use faxtract_protocol::paths;
use faxtract_protocol::types::{
    ConfidenceTier, Document, JobId, JobRecord, ProcessedRecord, ProcessingId, SupportedMime,
    TemplateId, TenantId,
};
use faxtract_queue::{BatchStatus, BatchSubmission, JobPayload, JobQueue, JobSource};
use faxtract_store::{ObjectStore, StoreError};
use faxtract_templates::Template;

use crate::publish::FhirPublisher;

/// One file in an ingest request.
pub struct IngestFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

/// Response of the synchronous fast path.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResponse {
    pub processing_id: ProcessingId,
    pub status: &'static str,
    pub duplicate: bool,
    pub record: ProcessedRecord,
    pub low_confidence_fields: Vec<LowConfidenceField>,
}

/// The service facade over the pipeline, queue, templates, and stores.
pub struct Service {
    pipeline: Arc<Pipeline>,
    queue: JobQueue,
    publisher: Option<Arc<dyn FhirPublisher>>,
}

impl Service {
    pub fn new(
        pipeline: Arc<Pipeline>,
        queue: JobQueue,
        publisher: Option<Arc<dyn FhirPublisher>>,
    ) -> Self {
        Self {
            pipeline,
            queue,
            publisher,
        }
    }

    pub fn context(&self) -> &PipelineContext {
        self.pipeline.context()
    }

    fn validate_ingest(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        filename: &str,
    ) -> Result<Document, PipelineError> {
        if filename.trim().is_empty() {
            return Err(PipelineError::validation("filename is required"));
        }
        if bytes.is_empty() {
            return Err(PipelineError::validation("empty file body"));
        }
        let max_bytes = self.context().config.max_file_size_bytes();
        if bytes.len() as u64 > max_bytes {
            return Err(PipelineError::TooLarge {
                size_bytes: bytes.len() as u64,
                max_bytes,
            });
        }
        let mime = SupportedMime::from_mime_type(mime_type)
            .ok_or_else(|| PipelineError::UnsupportedMime(mime_type.to_string()))?;
        Ok(Document::new(bytes, filename, mime))
    }

    /// Synchronous fast path: run the state machine inline and return the
    /// finished (or deduplicated) record.
    pub async fn process_single(
        &self,
        file: IngestFile,
        tenant_id: TenantId,
        template_id: Option<TemplateId>,
    ) -> Result<ProcessResponse, PipelineError> {
        let document = self.validate_ingest(file.bytes, &file.mime_type, &file.filename)?;
        let outcome = self
            .pipeline
            .run(
                PipelineRequest {
                    document,
                    tenant_id,
                    template_id,
                    staged: None,
                },
                None,
            )
            .await?;

        if !outcome.duplicate {
            self.publish(&outcome.record);
        }
        Ok(ProcessResponse {
            processing_id: outcome.record.processing_id.clone(),
            status: "completed",
            duplicate: outcome.duplicate,
            record: outcome.record,
            low_confidence_fields: outcome.low_confidence_fields,
        })
    }

    /// Queue a single document for background processing. The source is
    /// staged before the job row exists, so a crashed worker can never
    /// lose the bytes.
    pub async fn process_async(
        &self,
        file: IngestFile,
        tenant_id: TenantId,
        template_id: Option<TemplateId>,
    ) -> Result<JobId, PipelineError> {
        let payload = self.stage(file, tenant_id, template_id).await?;
        self.queue.enqueue_single(payload).await
    }

    /// Fan a set of files out into one batch.
    pub async fn process_batch(
        &self,
        files: Vec<IngestFile>,
        tenant_id: TenantId,
        template_id: Option<TemplateId>,
    ) -> Result<BatchSubmission, PipelineError> {
        if files.is_empty() {
            return Err(PipelineError::validation("empty batch"));
        }
        let mut payloads = Vec::with_capacity(files.len());
        for file in files {
            payloads.push(
                self.stage(file, tenant_id.clone(), template_id.clone())
                    .await?,
            );
        }
        self.queue.enqueue_batch(payloads).await
    }

    async fn stage(
        &self,
        file: IngestFile,
        tenant_id: TenantId,
        template_id: Option<TemplateId>,
    ) -> Result<JobPayload, PipelineError> {
        let document = self.validate_ingest(file.bytes, &file.mime_type, &file.filename)?;

        // Gate before any object-store write. A known duplicate enqueues a
        // job referencing the existing source object; the pipeline then
        // short-circuits to the existing record.
        let gate = DedupGate::new(self.context().db.clone());
        match gate.check(&document.content_hash, &tenant_id).await? {
            DupCheck::Duplicate(existing) => {
                info!(
                    processing_id = %existing.processing_id,
                    tenant = %tenant_id,
                    "duplicate upload staged against existing source"
                );
                return Ok(JobPayload {
                    tenant_id,
                    filename: document.filename,
                    mime: document.mime,
                    template_id,
                    source: JobSource::ObjectRef {
                        key: existing.source_path.clone(),
                    },
                    content_hash: document.content_hash,
                });
            }
            DupCheck::ForeignTenant => {
                return Err(PipelineError::Duplicate(
                    "content already registered to another tenant".to_string(),
                ));
            }
            DupCheck::Fresh => {}
        }

        let epoch_ms = Utc::now().timestamp_millis();
        let processing_id = ProcessingId::derive(&document.content_hash, epoch_ms);
        let source_key = paths::source_key(
            ConfidenceTier::NeedsReview,
            &tenant_id,
            &processing_id,
            &document.filename,
            epoch_ms,
        );
        self.context()
            .store
            .put(&source_key, &document.raw_bytes, document.mime.as_mime())
            .await
            .map_err(|err| PipelineError::StoreTransient(err.to_string()))?;

        info!(processing_id = %processing_id, tenant = %tenant_id, "upload staged");
        Ok(JobPayload {
            tenant_id,
            filename: document.filename,
            mime: document.mime,
            template_id,
            source: JobSource::Staged(StagedSource {
                processing_id,
                epoch_ms,
                source_key,
            }),
            content_hash: document.content_hash,
        })
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<JobRecord, PipelineError> {
        self.queue.get(job_id).await
    }

    pub async fn get_batch(&self, child_job_ids: &[JobId]) -> Result<BatchStatus, PipelineError> {
        self.queue.get_batch(child_job_ids).await
    }

    pub async fn cancel_job(&self, job_id: &JobId) -> Result<bool, PipelineError> {
        self.queue.cancel(job_id).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, PipelineError> {
        self.queue.stats().await
    }

    pub async fn list_records(
        &self,
        tenant_id: &TenantId,
        filters: &RecordFilters,
    ) -> Result<Vec<ProcessedRecord>, PipelineError> {
        self.context()
            .db
            .list_records(tenant_id, filters)
            .await
            .map_err(|err| PipelineError::StoreTransient(err.to_string()))
    }

    pub async fn get_record(
        &self,
        tenant_id: &TenantId,
        processing_id: &ProcessingId,
    ) -> Result<ProcessedRecord, PipelineError> {
        self.context()
            .db
            .get_record(processing_id)
            .await
            .map_err(|err| PipelineError::StoreTransient(err.to_string()))?
            .filter(|record| &record.tenant_id == tenant_id)
            .ok_or_else(|| PipelineError::not_found(processing_id.to_string()))
    }

    /// Raw object download, restricted to the caller's tenant segment.
    pub async fn download_object(
        &self,
        tenant_id: &TenantId,
        path: &str,
    ) -> Result<Vec<u8>, PipelineError> {
        if !path_belongs_to_tenant(path, tenant_id) {
            return Err(PipelineError::not_found(path.to_string()));
        }
        self.context().store.get(path).await.map_err(|err| match err {
            StoreError::NotFound(key) => PipelineError::NotFound(key),
            err => PipelineError::StoreTransient(err.to_string()),
        })
    }

    /// Correction entry point (C11). Republishes the corrected record
    /// downstream when a publisher is configured.
    pub async fn update_record_kv(
        &self,
        tenant_id: &TenantId,
        processing_id: &ProcessingId,
        new_kv: BTreeMap<String, String>,
        actor: &str,
    ) -> Result<ProcessedRecord, PipelineError> {
        // Tenant check up front so foreign records read as missing.
        self.get_record(tenant_id, processing_id).await?;
        let updated = update_record_kv(self.context(), processing_id, new_kv, actor).await?;
        self.publish(&updated);
        Ok(updated)
    }

    /// Low-confidence re-analysis (second phase, on demand).
    pub async fn reanalyze_low_confidence(
        &self,
        tenant_id: &TenantId,
        processing_id: &ProcessingId,
        apply_suggestions: bool,
    ) -> Result<Vec<FieldAnalysis>, PipelineError> {
        self.get_record(tenant_id, processing_id).await?;
        reanalyze_low_confidence(self.context(), processing_id, apply_suggestions).await
    }

    pub async fn upload_template(
        &self,
        bytes: &[u8],
        tenant_id: &TenantId,
        name: &str,
    ) -> Result<Template, PipelineError> {
        self.context()
            .templates
            .upload(bytes, tenant_id, name)
            .await
            .map_err(template_error)
    }

    pub async fn list_templates(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<Template>, PipelineError> {
        self.context()
            .templates
            .list(tenant_id)
            .await
            .map_err(template_error)
    }

    pub async fn delete_template(
        &self,
        tenant_id: &TenantId,
        template_id: &TemplateId,
    ) -> Result<(), PipelineError> {
        self.context()
            .templates
            .delete(tenant_id, template_id)
            .await
            .map_err(template_error)
    }

    /// Fire-and-forget downstream delivery.
    fn publish(&self, record: &ProcessedRecord) {
        let Some(publisher) = self.publisher.clone() else {
            return;
        };
        let record = record.clone();
        tokio::spawn(async move {
            if let Err(err) = publisher.publish(&record).await {
                warn!(
                    processing_id = %record.processing_id,
                    error = %err,
                    "FHIR publish failed"
                );
            }
        });
    }
}

fn path_belongs_to_tenant(path: &str, tenant_id: &TenantId) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        // {tier}/source|processed/{tenant}/...
        [tier, kind, tenant, ..] if ConfidenceTier::parse(tier).is_some() => {
            (*kind == "source" || *kind == "processed") && *tenant == tenant_id.as_str()
        }
        // templates/{tenant}/...
        ["templates", tenant, ..] => *tenant == tenant_id.as_str(),
        _ => false,
    }
}

fn template_error(err: faxtract_templates::TemplateError) -> PipelineError {
    use faxtract_templates::TemplateError;
    match err {
        TemplateError::NotFound(msg) => PipelineError::NotFound(msg),
        TemplateError::Parse(msg) => PipelineError::Validation(msg),
        err => PipelineError::StoreTransient(err.to_string()),
    }
}
