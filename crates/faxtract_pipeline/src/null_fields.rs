//! Null-field tracking for downstream QA.
//!
//! Runs once per completed record. Failures here never block pipeline
//! completion; the orchestrator logs a warning and moves on.

use chrono::Utc;

use faxtract_protocol::types::{NullFieldRecord, ProcessedRecord};

/// The fixed required-field set, canonical names.
pub const REQUIRED_FIELDS: &[&str] = &[
    "Name",
    "Date of Birth",
    "Member ID",
    "Address",
    "Gender",
    "Insurance ID",
];

/// Match tokens per required field, normalized. A record field satisfies a
/// required field when its folded name equals or contains one of these.
fn match_tokens(required: &str) -> &'static [&'static str] {
    match required {
        "Name" => &["name"],
        "Date of Birth" => &["dateofbirth", "dob", "birthdate"],
        "Member ID" => &["memberid", "membernumber"],
        "Address" => &["address", "addr"],
        "Gender" => &["gender", "sex"],
        "Insurance ID" => &["insuranceid", "insurance", "policy"],
        _ => &[],
    }
}

fn fold(key: &str) -> String {
    key.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

/// Empty-equivalent values.
fn is_null_value(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") || trimmed.eq_ignore_ascii_case("n/a")
}

/// Enumerate which required fields are missing or empty on a completed
/// record.
pub fn build_null_field_record(record: &ProcessedRecord) -> NullFieldRecord {
    let folded_fields: Vec<(String, &String)> = record
        .kv_pairs
        .iter()
        .map(|(key, value)| (fold(key), value))
        .collect();

    let mut null_field_names = Vec::new();
    for required in REQUIRED_FIELDS {
        let tokens = match_tokens(required);
        let satisfied = folded_fields.iter().any(|(folded, value)| {
            tokens.iter().any(|token| folded.contains(token)) && !is_null_value(value)
        });
        if !satisfied {
            null_field_names.push((*required).to_string());
        }
    }

    NullFieldRecord {
        processing_id: record.processing_id.clone(),
        tenant_id: record.tenant_id.clone(),
        filename: record.filename.clone(),
        null_field_names,
        all_extracted_fields: record.kv_pairs.clone(),
        created_at: Utc::now(),
    }
}
