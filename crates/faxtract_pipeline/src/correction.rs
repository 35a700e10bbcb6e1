//! Human/API corrections with audit trail and confidence recomputation.

use std::collections::BTreeMap;

use tracing::warn;

use faxtract_extract::confidence;
use faxtract_protocol::errors::PipelineError;
use faxtract_protocol::paths;
use faxtract_protocol::types::{ProcessedRecord, ProcessingId};
use faxtract_store::ObjectStore;
use faxtract_templates::TemplateField;

use crate::bucket::{BucketPolicy, Relocator};
use crate::convert::{from_db, from_store};
use crate::orchestrator::PipelineContext;
use crate::processed_json::processed_record_json;

/// Apply a correction to a completed record.
///
/// Edited keys must already exist on the record or belong to its
/// template's canonical fields. Edited keys get confidence 1.0, the
/// overall confidence is recomputed, and when the bucket flips both
/// objects relocate first (move-then-patch-record). A failed relocation
/// leaves the record untouched; a failed record update undoes the move.
pub async fn update_record_kv(
    ctx: &PipelineContext,
    processing_id: &ProcessingId,
    new_kv: BTreeMap<String, String>,
    actor: &str,
) -> Result<ProcessedRecord, PipelineError> {
    if new_kv.is_empty() {
        return Err(PipelineError::validation("no fields to correct"));
    }

    let record = ctx
        .db
        .get_record(processing_id)
        .await
        .map_err(from_db)?
        .ok_or_else(|| PipelineError::not_found(processing_id.to_string()))?;

    validate_keys(ctx, &record, &new_kv).await?;

    let mut kv_pairs = record.kv_pairs.clone();
    let mut kv_confidences = record.kv_confidences.clone();
    for (key, value) in &new_kv {
        kv_pairs.insert(key.clone(), value.clone());
        kv_confidences.insert(key.clone(), 1.0);
    }
    let overall_confidence = confidence::overall_confidence(record.ocr_confidence, &kv_confidences);

    let current_tier = paths::tier_of_key(&record.source_path).ok_or_else(|| {
        PipelineError::internal(format!("untiered source path: {}", record.source_path))
    })?;
    let policy = BucketPolicy::new(ctx.config.confidence_threshold);
    let target_tier = policy.bucket(overall_confidence);

    let relocator = Relocator::new(ctx.store.clone());
    let moved = if target_tier != current_tier {
        Some(relocator.relocate(&record, target_tier).await?)
    } else {
        None
    };
    let (source_path, processed_path) = match &moved {
        Some(paths) => (paths.source_path.clone(), paths.processed_path.clone()),
        None => (record.source_path.clone(), record.processed_path.clone()),
    };

    let kv_pairs_json =
        serde_json::to_string(&kv_pairs).map_err(|err| PipelineError::internal(err.to_string()))?;
    let kv_confidences_json = serde_json::to_string(&kv_confidences)
        .map_err(|err| PipelineError::internal(err.to_string()))?;

    if let Err(err) = ctx
        .db
        .apply_correction(
            processing_id,
            &kv_pairs_json,
            &kv_confidences_json,
            overall_confidence,
            actor,
            &source_path,
            &processed_path,
        )
        .await
    {
        if let Some(moved) = &moved {
            if let Err(undo) = relocator.undo(&record, moved).await {
                warn!(
                    processing_id = %processing_id,
                    error = %undo,
                    "failed to undo relocation after correction rollback"
                );
            }
        }
        return Err(from_db(err));
    }

    let updated = ctx
        .db
        .get_record(processing_id)
        .await
        .map_err(from_db)?
        .ok_or_else(|| PipelineError::internal("corrected record vanished"))?;

    // Keep the stored JSON in step with the corrected row. Best effort:
    // the record row is authoritative for metadata.
    let payload = serde_json::to_vec(&processed_record_json(&updated))
        .map_err(|err| PipelineError::internal(err.to_string()))?;
    if let Err(err) = ctx
        .store
        .put(&updated.processed_path, &payload, "application/json")
        .await
        .map_err(from_store)
    {
        warn!(
            processing_id = %processing_id,
            error = %err,
            "failed to rewrite processed json after correction"
        );
    }

    Ok(updated)
}

async fn validate_keys(
    ctx: &PipelineContext,
    record: &ProcessedRecord,
    new_kv: &BTreeMap<String, String>,
) -> Result<(), PipelineError> {
    let mut allowed: Vec<String> = record.kv_pairs.keys().cloned().collect();
    if let Some(template_id) = &record.template_id {
        // Tombstoned templates still validate corrections on records that
        // reference them.
        if let Some(row) = ctx.db.get_template(template_id).await.map_err(from_db)? {
            let fields: Vec<TemplateField> = serde_json::from_str(&row.fields_json)
                .map_err(|err| PipelineError::internal(err.to_string()))?;
            allowed.extend(fields.into_iter().map(|field| field.canonical_name));
        }
    }

    for key in new_kv.keys() {
        if !allowed.iter().any(|candidate| candidate == key) {
            return Err(PipelineError::validation(format!(
                "unknown field for correction: {key}"
            )));
        }
    }
    Ok(())
}
