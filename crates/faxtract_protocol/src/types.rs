//! Canonical identifiers and domain entities.
//!
//! These types are the single source of truth for the document pipeline.
//! All interfaces (service facade, CLI, workers) should use them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! define_uuid_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                Uuid::parse_str(value)
                    .map_err(|e| IdParseError::new(format!("invalid {}: {}", $label, e)))?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_uuid_id!(JobId, "job ID");
define_uuid_id!(BatchId, "batch ID");
define_uuid_id!(TemplateId, "template ID");

/// Error returned when parsing an identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

/// Tenant isolation scope, supplied by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// SHA-256 of the raw upload bytes. The sole deduplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute the hash of raw bytes. Computed once per document.
    pub fn of(bytes: &[u8]) -> Self {
        Self(hash::sha256_hex(bytes))
    }

    /// Wrap an already-computed hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for one pipeline run.
///
/// Derived from the content hash plus the ingest epoch millis, independent
/// of filename. Re-uploads of the same bytes resolve to the original run's
/// id through the record store, never by re-derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessingId(String);

impl ProcessingId {
    pub fn derive(content_hash: &ContentHash, epoch_ms: i64) -> Self {
        Self(hash::derive_processing_id(content_hash.as_str(), epoch_ms))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Canonical Enums
// ============================================================================

/// Storage tier for a record, decided from overall confidence.
///
/// The string forms are bit-exact path segments in the object store layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceTier {
    /// Records at or above the confidence threshold.
    HighConfidence,
    /// Records routed to human review.
    NeedsReview,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighConfidence => "Above-95%",
            Self::NeedsReview => "needs-review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Above-95%" => Some(Self::HighConfidence),
            "needs-review" => Some(Self::NeedsReview),
            _ => None,
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Document classification emitted by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Classification {
    Medical,
    Invoice,
    Insurance,
    Referral,
    #[default]
    Other,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medical => "Medical",
            Self::Invoice => "Invoice",
            Self::Insurance => "Insurance",
            Self::Referral => "Referral",
            Self::Other => "Other",
        }
    }

    /// Tolerant parse; unrecognized tags fall back to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "medical" => Self::Medical,
            "invoice" => Self::Invoice,
            "insurance" => Self::Insurance,
            "referral" => Self::Referral,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upload formats accepted at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportedMime {
    Pdf,
    Png,
    Jpeg,
    Tiff,
}

impl SupportedMime {
    pub const ALL: &'static [SupportedMime] = &[Self::Pdf, Self::Png, Self::Jpeg, Self::Tiff];

    /// Canonical content type.
    pub fn as_mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Tiff => "image/tiff",
        }
    }

    /// Parse a content type, accepting common aliases.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_lowercase().as_str() {
            "application/pdf" => Some(Self::Pdf),
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/tiff" | "image/tif" => Some(Self::Tiff),
            _ => None,
        }
    }

    /// Guess from a filename extension; unknown extensions read as PDF,
    /// the dominant upload format.
    pub fn from_filename(filename: &str) -> Self {
        let extension = filename
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match extension.as_str() {
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "tif" | "tiff" => Self::Tiff,
            _ => Self::Pdf,
        }
    }
}

impl fmt::Display for SupportedMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_mime())
    }
}

/// What a job row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Single,
    Batch,
    BulkSweep,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Batch => "batch",
            Self::BulkSweep => "bulk_sweep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(Self::Single),
            "batch" => Some(Self::Batch),
            "bulk_sweep" => Some(Self::BulkSweep),
            _ => None,
        }
    }
}

/// Lifecycle of a job in the durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Queued,
    Running,
    Success,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Domain Entities
// ============================================================================

/// An uploaded document, alive only from ingest until the source write
/// and enqueue. The content hash is computed exactly once, here.
#[derive(Debug, Clone)]
pub struct Document {
    pub raw_bytes: Vec<u8>,
    pub filename: String,
    pub mime: SupportedMime,
    pub size_bytes: u64,
    pub content_hash: ContentHash,
}

impl Document {
    pub fn new(raw_bytes: Vec<u8>, filename: impl Into<String>, mime: SupportedMime) -> Self {
        let content_hash = ContentHash::of(&raw_bytes);
        let size_bytes = raw_bytes.len() as u64;
        Self {
            raw_bytes,
            filename: filename.into(),
            mime,
            size_bytes,
            content_hash,
        }
    }
}

/// Canonical-field mapping produced by applying a template to extracted
/// key-value pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMapping {
    pub mapped_values: BTreeMap<String, String>,
    pub field_confidences: BTreeMap<String, f64>,
    pub unmapped_extracted_keys: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

/// The primary persistent entity: one processed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub processing_id: ProcessingId,
    pub content_hash: ContentHash,
    pub tenant_id: TenantId,
    pub filename: String,
    /// Object-store key of the relocated source; tier embedded in the key.
    pub source_path: String,
    /// Object-store key of the extracted-data JSON; same tier as the source.
    pub processed_path: String,
    pub kv_pairs: BTreeMap<String, String>,
    pub kv_confidences: BTreeMap<String, f64>,
    pub ocr_confidence: f64,
    pub overall_confidence: f64,
    pub classification: Classification,
    pub raw_text: Option<String>,
    pub positioning_data: Option<serde_json::Value>,
    pub template_id: Option<TemplateId>,
    pub template_mapping: Option<TemplateMapping>,
    /// Set when extraction failed and the record was committed with empty
    /// kv pairs (classification Other).
    pub extract_fallback: bool,
    pub has_corrections: bool,
    pub last_corrected_by: Option<String>,
    pub last_corrected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessedRecord {
    /// Fields whose per-pair confidence is below the given threshold.
    pub fn low_confidence_fields(&self, threshold: f64) -> Vec<String> {
        self.kv_confidences
            .iter()
            .filter(|(_, conf)| **conf < threshold)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Which required fields were missing or empty on a completed record.
/// Produced once per completion, consumed by downstream QA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullFieldRecord {
    pub processing_id: ProcessingId,
    pub tenant_id: TenantId,
    pub filename: String,
    pub null_field_names: Vec<String>,
    pub all_extracted_fields: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// A job row in the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    /// 0..=100. Reported at PLACED (50) and COMPLETED (100).
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub parent_batch_id: Option<BatchId>,
    /// Set by cancellation; the pipeline still runs to completion so no
    /// bytes are orphaned, but the result is not surfaced.
    pub result_ignored: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_strings_are_bit_exact() {
        assert_eq!(ConfidenceTier::HighConfidence.as_str(), "Above-95%");
        assert_eq!(ConfidenceTier::NeedsReview.as_str(), "needs-review");
        assert_eq!(
            ConfidenceTier::parse("Above-95%"),
            Some(ConfidenceTier::HighConfidence)
        );
        assert_eq!(ConfidenceTier::parse("review"), None);
    }

    #[test]
    fn classification_parse_is_tolerant() {
        assert_eq!(Classification::parse("medical"), Classification::Medical);
        assert_eq!(Classification::parse(" Referral "), Classification::Referral);
        assert_eq!(Classification::parse("unknown tag"), Classification::Other);
    }

    #[test]
    fn mime_aliases() {
        assert_eq!(
            SupportedMime::from_mime_type("image/jpg"),
            Some(SupportedMime::Jpeg)
        );
        assert_eq!(
            SupportedMime::from_mime_type("APPLICATION/PDF"),
            Some(SupportedMime::Pdf)
        );
        assert_eq!(SupportedMime::from_mime_type("text/plain"), None);
        assert_eq!(SupportedMime::from_filename("scan.PNG"), SupportedMime::Png);
        assert_eq!(SupportedMime::from_filename("a.b.jpeg"), SupportedMime::Jpeg);
        assert_eq!(SupportedMime::from_filename("fax.tif"), SupportedMime::Tiff);
        assert_eq!(SupportedMime::from_filename("noext"), SupportedMime::Pdf);
    }

    #[test]
    fn document_hashes_once() {
        let doc = Document::new(b"hello".to_vec(), "a.pdf", SupportedMime::Pdf);
        assert_eq!(doc.content_hash, ContentHash::of(b"hello"));
        assert_eq!(doc.size_bytes, 5);
    }

    #[test]
    fn job_state_roundtrip() {
        for state in [
            JobState::Queued,
            JobState::Running,
            JobState::Success,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert!(JobState::Success.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }
}
