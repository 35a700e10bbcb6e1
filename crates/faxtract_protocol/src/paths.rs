//! Object-store path grammar and home-directory resolution.
//!
//! The grammar is bit-exact and owned here; no other crate builds keys by
//! hand. Keys are logical, `/`-separated, and relative to the object-store
//! root:
//!
//! ```text
//! {tier}/source/{tenant_id}/{processing_id}/{safe_filename}_{epoch_ms}
//! {tier}/processed/{tenant_id}/{processing_id}/{epoch_ms}_{safe_filename}_extracted_data.json
//! templates/{tenant_id}/{template_id}/template.xlsx
//! ```

use std::path::PathBuf;
use std::sync::Once;

use crate::types::{ConfidenceTier, ProcessingId, TemplateId, TenantId};

/// Watched prefix for files dropped outside the API. The periodic sweep
/// lists this prefix and feeds new objects into the pipeline.
pub const SWEEP_SOURCE_PREFIX: &str = "bulk-processing/source/";

const PROCESSED_SUFFIX: &str = "_extracted_data.json";

static CREATE_DIR_WARNED: Once = Once::new();

/// Strip path separators and control characters from a filename so it can
/// never escape its key segment.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| !ch.is_control())
        .map(|ch| match ch {
            '/' | '\\' => '_',
            other => other,
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Key for the source object in its tier.
pub fn source_key(
    tier: ConfidenceTier,
    tenant_id: &TenantId,
    processing_id: &ProcessingId,
    filename: &str,
    epoch_ms: i64,
) -> String {
    format!(
        "{}/source/{}/{}/{}_{}",
        tier.as_str(),
        tenant_id.as_str(),
        processing_id.as_str(),
        safe_filename(filename),
        epoch_ms
    )
}

/// Key for the extracted-data JSON in its tier.
pub fn processed_key(
    tier: ConfidenceTier,
    tenant_id: &TenantId,
    processing_id: &ProcessingId,
    filename: &str,
    epoch_ms: i64,
) -> String {
    format!(
        "{}/processed/{}/{}/{}_{}{}",
        tier.as_str(),
        tenant_id.as_str(),
        processing_id.as_str(),
        epoch_ms,
        safe_filename(filename),
        PROCESSED_SUFFIX
    )
}

/// Key for a stored template upload.
pub fn template_key(tenant_id: &TenantId, template_id: &TemplateId) -> String {
    format!(
        "templates/{}/{}/template.xlsx",
        tenant_id.as_str(),
        template_id.as_str()
    )
}

/// Extract the tier segment from a source or processed key.
pub fn tier_of_key(key: &str) -> Option<ConfidenceTier> {
    let first = key.split('/').next()?;
    ConfidenceTier::parse(first)
}

/// Re-derive a key under a different tier, preserving every other segment
/// (processing id and epoch millis included). Returns `None` when the key
/// does not start with a tier segment.
pub fn retarget_tier(key: &str, new_tier: ConfidenceTier) -> Option<String> {
    let (first, rest) = key.split_once('/')?;
    ConfidenceTier::parse(first)?;
    Some(format!("{}/{}", new_tier.as_str(), rest))
}

/// Resolve the Faxtract home directory.
///
/// Priority:
/// 1) FAXTRACT_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.faxtract
pub fn faxtract_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("FAXTRACT_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".faxtract");
    }
    PathBuf::from(".").join(".faxtract")
}

fn ensure_home_dir(home: &PathBuf) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create Faxtract home directory {}: {}. Set FAXTRACT_HOME or pass --state-db.",
                home.display(),
                err
            );
        });
    }
}

/// Default record store path: ~/.faxtract/state.sqlite
pub fn default_state_db_path() -> PathBuf {
    let home = faxtract_home();
    ensure_home_dir(&home);
    home.join("state.sqlite")
}

/// Default object store root: ~/.faxtract/objects
pub fn default_object_root() -> PathBuf {
    let home = faxtract_home();
    ensure_home_dir(&home);
    home.join("objects")
}

/// Default logs directory: ~/.faxtract/logs
pub fn default_logs_dir() -> PathBuf {
    let home = faxtract_home();
    ensure_home_dir(&home);
    home.join("logs")
}
