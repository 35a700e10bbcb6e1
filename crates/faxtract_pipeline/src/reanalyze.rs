//! On-demand re-analysis of low-confidence fields.
//!
//! Explicitly a second phase: the main pipeline never runs this. Source
//! bytes come from the TTL cache when still warm, otherwise from the
//! object store.

use std::collections::BTreeMap;

use tracing::info;

use faxtract_extract::{Extractor, FieldAnalysis, FieldStatus, LowConfidenceField, SourceImage};
use faxtract_protocol::errors::PipelineError;
use faxtract_protocol::types::{ProcessingId, SupportedMime};
use faxtract_store::ObjectStore;

use crate::convert::{from_db, from_extract, from_store};
use crate::correction;
use crate::orchestrator::PipelineContext;

/// Re-run a vision-aware extractor against only the record's
/// low-confidence fields. With `apply_suggestions`, fields judged
/// incorrect with a suggested value are corrected through the normal
/// correction flow.
pub async fn reanalyze_low_confidence(
    ctx: &PipelineContext,
    processing_id: &ProcessingId,
    apply_suggestions: bool,
) -> Result<Vec<FieldAnalysis>, PipelineError> {
    let record = ctx
        .db
        .get_record(processing_id)
        .await
        .map_err(from_db)?
        .ok_or_else(|| PipelineError::not_found(processing_id.to_string()))?;

    let threshold = ctx.config.low_conf_field_threshold;
    let fields: Vec<LowConfidenceField> = record
        .kv_confidences
        .iter()
        .filter(|(_, conf)| **conf < threshold)
        .map(|(name, conf)| LowConfidenceField {
            name: name.clone(),
            value: record.kv_pairs.get(name).cloned().unwrap_or_default(),
            confidence: *conf,
        })
        .collect();
    if fields.is_empty() {
        return Ok(Vec::new());
    }

    let (bytes, mime) = match ctx.source_cache.get(processing_id) {
        Some(cached) => cached,
        None => {
            let bytes = ctx
                .store
                .get(&record.source_path)
                .await
                .map_err(from_store)?;
            (bytes, SupportedMime::from_filename(&record.filename))
        }
    };

    let analyses = ctx
        .extractor
        .reanalyze_fields(&SourceImage { bytes, mime }, &fields)
        .await
        .map_err(from_extract)?;
    info!(
        processing_id = %processing_id,
        fields = fields.len(),
        findings = analyses.len(),
        "low-confidence re-analysis complete"
    );

    if apply_suggestions {
        let suggestions: BTreeMap<String, String> = analyses
            .iter()
            .filter(|analysis| analysis.status == FieldStatus::Incorrect)
            .filter_map(|analysis| {
                analysis
                    .suggested_value
                    .clone()
                    .map(|value| (analysis.field.clone(), value))
            })
            .collect();
        if !suggestions.is_empty() {
            correction::update_record_kv(
                ctx,
                processing_id,
                suggestions,
                "low-confidence-reanalysis",
            )
            .await?;
        }
    }

    // The immediate re-analysis has run; the cached bytes are no longer
    // needed before their TTL.
    ctx.source_cache.release(processing_id);

    Ok(analyses)
}

