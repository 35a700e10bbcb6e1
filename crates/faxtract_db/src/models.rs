//! Row models and query parameter types.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use faxtract_protocol::types::{
    BatchId, Classification, ConfidenceTier, ContentHash, JobId, JobKind, JobRecord, JobState,
    NullFieldRecord, ProcessedRecord, ProcessingId, TemplateId, TenantId,
};

use crate::error::{DbError, Result};

/// Filters for tenant-scoped record listings. Newest first.
#[derive(Debug, Clone, Default)]
pub struct RecordFilters {
    pub classification: Option<Classification>,
    pub tier: Option<ConfidenceTier>,
    pub corrected: Option<bool>,
    /// Epoch millis bounds on created_at.
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub limit: Option<i64>,
}

/// Parameters for enqueueing one job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: JobId,
    pub kind: JobKind,
    pub payload: Value,
    pub parent_batch_id: Option<BatchId>,
    pub tenant_id: Option<TenantId>,
    pub content_hash: Option<ContentHash>,
}

/// A claimed job handed to a worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job_id: JobId,
    pub kind: JobKind,
    pub payload: Value,
    pub parent_batch_id: Option<BatchId>,
    pub tenant_id: Option<TenantId>,
    pub content_hash: Option<ContentHash>,
    pub result_ignored: bool,
}

/// Queue statistics for backpressure and the jobs CLI.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub success: i64,
    pub failed: i64,
}

impl QueueStats {
    /// Jobs not yet terminal; the backpressure input.
    pub fn depth(&self) -> i64 {
        self.queued + self.running
    }
}

/// Template metadata row. The field schema stays serialized; the template
/// registry owns its shape.
#[derive(Debug, Clone)]
pub struct TemplateRow {
    pub template_id: TemplateId,
    pub tenant_id: TenantId,
    pub name: String,
    pub fields_json: String,
    pub object_key: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

pub(crate) fn row_to_record(row: &SqliteRow) -> Result<ProcessedRecord> {
    let kv_pairs: String = row.try_get("kv_pairs").map_err(DbError::from)?;
    let kv_confidences: String = row.try_get("kv_confidences").map_err(DbError::from)?;
    let positioning_data: Option<String> = row.try_get("positioning_data").map_err(DbError::from)?;
    let template_mapping: Option<String> = row.try_get("template_mapping").map_err(DbError::from)?;
    let template_id: Option<String> = row.try_get("template_id").map_err(DbError::from)?;
    let classification: String = row.try_get("classification").map_err(DbError::from)?;
    let last_corrected_at: Option<i64> = row.try_get("last_corrected_at").map_err(DbError::from)?;
    let created_at: i64 = row.try_get("created_at").map_err(DbError::from)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(DbError::from)?;

    Ok(ProcessedRecord {
        processing_id: ProcessingId::from_string(
            row.try_get::<String, _>("processing_id").map_err(DbError::from)?,
        ),
        content_hash: ContentHash::from_hex(
            row.try_get::<String, _>("content_hash").map_err(DbError::from)?,
        ),
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(DbError::from)?),
        filename: row.try_get("filename").map_err(DbError::from)?,
        source_path: row.try_get("source_path").map_err(DbError::from)?,
        processed_path: row.try_get("processed_path").map_err(DbError::from)?,
        kv_pairs: serde_json::from_str(&kv_pairs)?,
        kv_confidences: serde_json::from_str(&kv_confidences)?,
        ocr_confidence: row.try_get("ocr_confidence").map_err(DbError::from)?,
        overall_confidence: row.try_get("overall_confidence").map_err(DbError::from)?,
        classification: Classification::parse(&classification),
        raw_text: row.try_get("raw_text").map_err(DbError::from)?,
        positioning_data: positioning_data
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
        template_id: template_id
            .map(|id| TemplateId::parse(&id).map_err(|e| DbError::invalid_state(e.to_string())))
            .transpose()?,
        template_mapping: template_mapping
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
        extract_fallback: row.try_get::<i64, _>("extract_fallback").map_err(DbError::from)? != 0,
        has_corrections: row.try_get::<i64, _>("has_corrections").map_err(DbError::from)? != 0,
        last_corrected_by: row.try_get("last_corrected_by").map_err(DbError::from)?,
        last_corrected_at: last_corrected_at.map(millis_to_datetime),
        created_at: millis_to_datetime(created_at),
        updated_at: millis_to_datetime(updated_at),
    })
}

pub(crate) fn row_to_null_field_record(row: &SqliteRow) -> Result<NullFieldRecord> {
    let null_field_names: String = row.try_get("null_field_names").map_err(DbError::from)?;
    let all_extracted_fields: String = row.try_get("all_extracted_fields").map_err(DbError::from)?;
    let created_at: i64 = row.try_get("created_at").map_err(DbError::from)?;

    Ok(NullFieldRecord {
        processing_id: ProcessingId::from_string(
            row.try_get::<String, _>("processing_id").map_err(DbError::from)?,
        ),
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(DbError::from)?),
        filename: row.try_get("filename").map_err(DbError::from)?,
        null_field_names: serde_json::from_str(&null_field_names)?,
        all_extracted_fields: serde_json::from_str(&all_extracted_fields)?,
        created_at: millis_to_datetime(created_at),
    })
}

pub(crate) fn row_to_job(row: &SqliteRow) -> Result<JobRecord> {
    let kind: String = row.try_get("kind").map_err(DbError::from)?;
    let state: String = row.try_get("state").map_err(DbError::from)?;
    let result: Option<String> = row.try_get("result").map_err(DbError::from)?;
    let parent_batch_id: Option<String> = row.try_get("parent_batch_id").map_err(DbError::from)?;
    let created_at: i64 = row.try_get("created_at").map_err(DbError::from)?;

    Ok(JobRecord {
        job_id: JobId::parse(row.try_get::<String, _>("job_id").map_err(DbError::from)?.as_str())
            .map_err(|e| DbError::invalid_state(e.to_string()))?,
        kind: JobKind::parse(&kind)
            .ok_or_else(|| DbError::invalid_state(format!("unknown job kind: {kind}")))?,
        state: JobState::parse(&state)
            .ok_or_else(|| DbError::invalid_state(format!("unknown job state: {state}")))?,
        progress: row.try_get::<i64, _>("progress").map_err(DbError::from)?.clamp(0, 100) as u8,
        result: result.map(|json| serde_json::from_str(&json)).transpose()?,
        error: row.try_get("error").map_err(DbError::from)?,
        parent_batch_id: parent_batch_id
            .map(|id| BatchId::parse(&id).map_err(|e| DbError::invalid_state(e.to_string())))
            .transpose()?,
        result_ignored: row.try_get::<i64, _>("result_ignored").map_err(DbError::from)? != 0,
        created_at: millis_to_datetime(created_at),
    })
}

pub(crate) fn row_to_template(row: &SqliteRow) -> Result<TemplateRow> {
    let deleted_at: Option<i64> = row.try_get("deleted_at").map_err(DbError::from)?;
    let created_at: i64 = row.try_get("created_at").map_err(DbError::from)?;

    Ok(TemplateRow {
        template_id: TemplateId::parse(
            row.try_get::<String, _>("template_id").map_err(DbError::from)?.as_str(),
        )
        .map_err(|e| DbError::invalid_state(e.to_string()))?,
        tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id").map_err(DbError::from)?),
        name: row.try_get("name").map_err(DbError::from)?,
        fields_json: row.try_get("fields").map_err(DbError::from)?,
        object_key: row.try_get("object_key").map_err(DbError::from)?,
        created_at: millis_to_datetime(created_at),
        deleted_at: deleted_at.map(millis_to_datetime),
    })
}
