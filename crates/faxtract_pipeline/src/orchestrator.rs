//! The per-document state machine.
//!
//! ```text
//! RECEIVED -> (DUP? -> RETURN_EXISTING)
//!          -> UPLOADED_SOURCE
//!          -> OCR_DONE
//!          -> EXTRACTED
//!          -> (template? -> MAPPED)
//!          -> PLACED      source moved into its tier, JSON written
//!          -> RECORDED    record row + null-field row
//!          -> COMPLETED
//! ```
//!
//! Transitions within one processing id are strictly sequential. The
//! processed JSON is written only after the source sits in its final tier
//! location; a failed JSON write leaves the source in place for the
//! sweeper.

use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use faxtract_db::{DbError, FaxtractDb};
use faxtract_extract::{
    confidence, format, Backoff, Extraction, Extractor, LowConfidenceField, OcrProvider,
    OcrResult, TemplateHint,
};
use faxtract_protocol::config::PipelineConfig;
use faxtract_protocol::errors::PipelineError;
use faxtract_protocol::paths;
use faxtract_protocol::types::{
    ConfidenceTier, Document, ProcessedRecord, ProcessingId, TemplateId, TenantId,
};
use faxtract_store::ObjectStore;
use faxtract_templates::{apply_template, Template, TemplateRegistry};

use crate::bucket::BucketPolicy;
use crate::cache::SourceCache;
use crate::convert::{from_db, from_ocr, from_store, from_template};
use crate::dedup::{DedupGate, DupCheck};
use crate::null_fields::build_null_field_record;
use crate::processed_json::processed_record_json;

/// Progress milestones reported to the job row.
pub const PROGRESS_PLACED: u8 = 50;
pub const PROGRESS_COMPLETED: u8 = 100;

/// Progress sink; invoked at PLACED and COMPLETED.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Everything the pipeline needs, injected explicitly. Cheap to clone.
#[derive(Clone)]
pub struct PipelineContext {
    pub db: FaxtractDb,
    pub store: Arc<dyn ObjectStore>,
    pub ocr: Arc<dyn OcrProvider>,
    pub extractor: Arc<dyn Extractor>,
    pub templates: Arc<TemplateRegistry>,
    pub source_cache: Arc<SourceCache>,
    pub config: Arc<PipelineConfig>,
}

/// A source object already written by the ingest path, so the pipeline
/// skips the upload and reuses the derived identity.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StagedSource {
    pub processing_id: ProcessingId,
    pub epoch_ms: i64,
    pub source_key: String,
}

/// One document to push through the state machine.
pub struct PipelineRequest {
    pub document: Document,
    pub tenant_id: TenantId,
    pub template_id: Option<TemplateId>,
    pub staged: Option<StagedSource>,
}

/// Result of a completed (or short-circuited) run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub record: ProcessedRecord,
    pub duplicate: bool,
    /// kv entries below the configured per-field threshold.
    pub low_confidence_fields: Vec<LowConfidenceField>,
    /// Base64 of the source bytes, cached for on-demand re-analysis.
    /// Absent for duplicate short-circuits.
    pub source_b64: Option<String>,
}

/// The pipeline orchestrator.
pub struct Pipeline {
    ctx: PipelineContext,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run one document to COMPLETED, or short-circuit on a duplicate.
    pub async fn run(
        &self,
        request: PipelineRequest,
        progress: Option<ProgressFn>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let ctx = &self.ctx;
        let tenant = &request.tenant_id;
        let document = &request.document;
        let backoff = Backoff::external_call();

        // RECEIVED: dedup gate before any object-store write.
        let gate = DedupGate::new(ctx.db.clone());
        match gate.check(&document.content_hash, tenant).await? {
            DupCheck::Duplicate(existing) => {
                info!(
                    processing_id = %existing.processing_id,
                    tenant = %tenant,
                    "duplicate upload short-circuited"
                );
                return Ok(self.duplicate_outcome(*existing));
            }
            DupCheck::ForeignTenant => {
                return Err(PipelineError::Duplicate(
                    "content already registered to another tenant".to_string(),
                ));
            }
            DupCheck::Fresh => {}
        }

        // UPLOADED_SOURCE: initial write lands in the review tier; the
        // placement move below settles the final location.
        let (processing_id, epoch_ms, uploaded_key) = match request.staged.clone() {
            Some(staged) => (staged.processing_id, staged.epoch_ms, staged.source_key),
            None => {
                let epoch_ms = Utc::now().timestamp_millis();
                let processing_id = ProcessingId::derive(&document.content_hash, epoch_ms);
                let key = paths::source_key(
                    ConfidenceTier::NeedsReview,
                    tenant,
                    &processing_id,
                    &document.filename,
                    epoch_ms,
                );
                backoff
                    .retry("source upload", PipelineError::is_transient, || async {
                        ctx.store
                            .put(&key, &document.raw_bytes, document.mime.as_mime())
                            .await
                            .map_err(from_store)
                    })
                    .await?;
                (processing_id, epoch_ms, key)
            }
        };
        info!(processing_id = %processing_id, tenant = %tenant, "source uploaded");

        // OCR_DONE: transient failures retry with backoff, unavailability
        // does not.
        let ocr_result = backoff
            .retry("ocr", PipelineError::is_transient, || async {
                ctx.ocr
                    .extract(&document.raw_bytes, document.mime)
                    .await
                    .map_err(from_ocr)
            })
            .await?;
        let ocr_confidence = ocr_result.mean_confidence();
        info!(processing_id = %processing_id, ocr_confidence, "ocr complete");

        // EXTRACTED: a failed extractor degrades to an empty record rather
        // than failing the job.
        let template = match &request.template_id {
            Some(template_id) => Some(
                ctx.templates
                    .get(tenant, template_id)
                    .await
                    .map_err(from_template)?,
            ),
            None => None,
        };
        let (extraction, extract_fallback) =
            match self.run_extractor(&ocr_result, template.as_deref()).await {
                Ok(extraction) => (extraction, false),
                Err(err) => {
                    warn!(
                        processing_id = %processing_id,
                        error = %err,
                        "extraction failed, falling back to empty record"
                    );
                    (Extraction::default(), true)
                }
            };
        let classification = extraction.classification;
        let (kv_pairs, kv_confidences) = finalize_pairs(&ocr_result, extraction);

        // MAPPED
        let template_mapping = template
            .as_ref()
            .map(|template| apply_template(template, &kv_pairs, &kv_confidences));

        // PLACED: decide the bucket, settle the source, then write the
        // JSON. Order matters; see the module docs.
        let overall_confidence = confidence::overall_confidence(ocr_confidence, &kv_confidences);
        let policy = BucketPolicy::new(ctx.config.confidence_threshold);
        let tier = policy.bucket(overall_confidence);

        let source_key =
            paths::source_key(tier, tenant, &processing_id, &document.filename, epoch_ms);
        if source_key != uploaded_key {
            backoff
                .retry("source placement", PipelineError::is_transient, || async {
                    ctx.store
                        .move_object(&uploaded_key, &source_key)
                        .await
                        .map_err(from_store)
                })
                .await?;
        }
        let processed_key =
            paths::processed_key(tier, tenant, &processing_id, &document.filename, epoch_ms);

        let now = Utc::now();
        let record = ProcessedRecord {
            processing_id: processing_id.clone(),
            content_hash: document.content_hash.clone(),
            tenant_id: tenant.clone(),
            filename: document.filename.clone(),
            source_path: source_key.clone(),
            processed_path: processed_key.clone(),
            kv_pairs,
            kv_confidences,
            ocr_confidence,
            overall_confidence,
            classification,
            raw_text: Some(ocr_result.raw_text()),
            positioning_data: Some(json!({
                "lines": ocr_result.lines,
                "words": ocr_result.words,
            })),
            template_id: request.template_id.clone(),
            template_mapping,
            extract_fallback,
            has_corrections: false,
            last_corrected_by: None,
            last_corrected_at: None,
            created_at: now,
            updated_at: now,
        };

        let payload = serde_json::to_vec(&processed_record_json(&record))
            .map_err(|err| PipelineError::internal(err.to_string()))?;
        if let Err(err) = backoff
            .retry("processed json write", PipelineError::is_transient, || async {
                ctx.store
                    .put(&processed_key, &payload, "application/json")
                    .await
                    .map_err(from_store)
            })
            .await
        {
            // Source stays put; the sweeper re-processes it later.
            warn!(
                processing_id = %processing_id,
                error = %err,
                "processed json write exhausted retries"
            );
            return Err(err);
        }
        if let Some(progress) = &progress {
            progress(PROGRESS_PLACED);
        }
        info!(processing_id = %processing_id, tier = tier.as_str(), "record placed");

        // RECORDED: the unique hash index is the real idempotency guard; a
        // lost race resolves to the winner and our artifacts are removed.
        match ctx.db.insert_record(&record).await {
            Ok(()) => {}
            Err(DbError::Duplicate(_)) => {
                let _ = ctx.store.delete(&processed_key).await;
                let _ = ctx.store.delete(&source_key).await;
                let existing = ctx
                    .db
                    .find_by_hash(&document.content_hash)
                    .await
                    .map_err(from_db)?
                    .ok_or_else(|| {
                        PipelineError::internal("duplicate insert with no winning record")
                    })?;
                if &existing.tenant_id != tenant {
                    return Err(PipelineError::Duplicate(
                        "content already registered to another tenant".to_string(),
                    ));
                }
                return Ok(self.duplicate_outcome(existing));
            }
            Err(err) => return Err(from_db(err)),
        }

        let null_record = build_null_field_record(&record);
        if let Err(err) = ctx.db.insert_null_field_record(&null_record).await {
            warn!(
                processing_id = %processing_id,
                error = %err,
                "null-field tracking failed"
            );
        }

        // COMPLETED
        ctx.source_cache
            .insert(&processing_id, document.raw_bytes.clone(), document.mime);
        if let Some(progress) = &progress {
            progress(PROGRESS_COMPLETED);
        }
        info!(processing_id = %processing_id, overall_confidence, "pipeline completed");

        let low_confidence_fields =
            low_confidence_fields(&record, ctx.config.low_conf_field_threshold);
        Ok(PipelineOutcome {
            source_b64: Some(B64.encode(&document.raw_bytes)),
            record,
            duplicate: false,
            low_confidence_fields,
        })
    }

    async fn run_extractor(
        &self,
        ocr: &OcrResult,
        template: Option<&Template>,
    ) -> Result<Extraction, PipelineError> {
        let result = match template {
            Some(template) => {
                let hint = TemplateHint {
                    name: template.name.clone(),
                    canonical_fields: template.canonical_field_names(),
                };
                self.ctx.extractor.extract_with_template(ocr, &hint).await
            }
            None => self.ctx.extractor.extract(ocr).await,
        };
        result.map_err(crate::convert::from_extract)
    }

    fn duplicate_outcome(&self, record: ProcessedRecord) -> PipelineOutcome {
        let low_confidence_fields =
            low_confidence_fields(&record, self.ctx.config.low_conf_field_threshold);
        PipelineOutcome {
            record,
            duplicate: true,
            low_confidence_fields,
            source_b64: None,
        }
    }
}

/// Format address-like values, resolve per-pair confidences through the
/// positioning data, and merge case-insensitive key collisions.
fn finalize_pairs(
    ocr: &OcrResult,
    extraction: Extraction,
) -> (
    std::collections::BTreeMap<String, String>,
    std::collections::BTreeMap<String, f64>,
) {
    let mut kv_pairs = std::collections::BTreeMap::new();
    let mut kv_confidences = std::collections::BTreeMap::new();

    for (key, value) in extraction.kv_pairs {
        let value = if format::is_address_field(&key) {
            format::format_address(&value)
        } else {
            value
        };
        let reported = extraction.kv_confidences.get(&key).copied().unwrap_or(0.0);
        let resolved = confidence::resolve_pair_confidence(
            reported,
            extraction.kv_spans.get(&key),
            &ocr.words,
        );
        kv_pairs.insert(key.clone(), value);
        kv_confidences.insert(key, resolved);
    }

    confidence::merge_case_insensitive(kv_pairs, kv_confidences)
}

fn low_confidence_fields(record: &ProcessedRecord, threshold: f64) -> Vec<LowConfidenceField> {
    record
        .kv_confidences
        .iter()
        .filter(|(_, conf)| **conf < threshold)
        .map(|(name, conf)| LowConfidenceField {
            name: name.clone(),
            value: record.kv_pairs.get(name).cloned().unwrap_or_default(),
            confidence: *conf,
        })
        .collect()
}
