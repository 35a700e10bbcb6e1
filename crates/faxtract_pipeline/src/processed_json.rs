//! The extracted-data JSON payload written beside each record.
//!
//! Key set is part of the external contract; optional members are omitted
//! when absent rather than serialized as null.

use serde_json::{json, Map, Value};

use faxtract_protocol::types::ProcessedRecord;

/// Serialize a record into the processed-JSON payload.
pub fn processed_record_json(record: &ProcessedRecord) -> Value {
    let mut payload = Map::new();
    payload.insert("processing_id".into(), json!(record.processing_id));
    payload.insert("content_hash".into(), json!(record.content_hash));
    payload.insert("filename".into(), json!(record.filename));
    payload.insert("tenant_id".into(), json!(record.tenant_id));
    payload.insert("kv_pairs".into(), json!(record.kv_pairs));
    payload.insert("kv_confidences".into(), json!(record.kv_confidences));
    payload.insert("ocr_confidence".into(), json!(record.ocr_confidence));
    payload.insert(
        "overall_confidence".into(),
        json!(record.overall_confidence),
    );
    payload.insert(
        "classification".into(),
        json!(record.classification.as_str()),
    );
    if let Some(raw_text) = &record.raw_text {
        payload.insert("raw_text".into(), json!(raw_text));
    }
    if let Some(positioning) = &record.positioning_data {
        payload.insert("positioning_data".into(), positioning.clone());
    }
    if let Some(template_id) = &record.template_id {
        payload.insert("template_id".into(), json!(template_id));
    }
    if let Some(mapping) = &record.template_mapping {
        payload.insert("template_mapping".into(), json!(mapping));
    }
    payload.insert("created_at".into(), json!(record.created_at.to_rfc3339()));
    payload.insert("updated_at".into(), json!(record.updated_at.to_rfc3339()));
    Value::Object(payload)
}
