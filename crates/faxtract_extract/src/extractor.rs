//! LLM-driven key/value extraction seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use faxtract_protocol::types::{Classification, SupportedMime};

use crate::ocr::{BoundingBox, OcrResult};

/// Extractor errors. The orchestrator treats every one of these as a
/// fallback trigger (empty kv, classification Other), never a job failure.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor failed: {0}")]
    Failed(String),

    #[error("extractor returned malformed output: {0}")]
    Malformed(String),

    #[error("extractor unavailable: {0}")]
    Unavailable(String),
}

/// Result of one free-form or template-guided extraction call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub kv_pairs: BTreeMap<String, String>,
    pub kv_confidences: BTreeMap<String, f64>,
    /// Bounding span per extracted key, when the provider reports one.
    #[serde(default)]
    pub kv_spans: BTreeMap<String, BoundingBox>,
    pub classification: Classification,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Field-schema hint handed to the template-guided mode. Deliberately
/// thinner than the registry's template type: the provider only needs the
/// canonical names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateHint {
    pub name: String,
    pub canonical_fields: Vec<String>,
}

/// Source bytes handed to the vision re-analyzer.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub mime: SupportedMime,
}

/// A field whose per-pair confidence fell below the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowConfidenceField {
    pub name: String,
    pub value: String,
    pub confidence: f64,
}

/// Verdict on one re-analyzed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Correct,
    Incorrect,
    Incomplete,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldAnalysis {
    pub field: String,
    pub status: FieldStatus,
    #[serde(default)]
    pub suggested_value: Option<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    pub explanation: String,
}

/// LLM-driven key/value extractor with free-form, template-guided, and
/// vision re-analysis modes.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Free-form extraction over OCR output.
    async fn extract(&self, ocr: &OcrResult) -> Result<Extraction, ExtractError>;

    /// Template-guided extraction: keys in the result are expected to use
    /// the template's canonical names where the provider can resolve them.
    async fn extract_with_template(
        &self,
        ocr: &OcrResult,
        template: &TemplateHint,
    ) -> Result<Extraction, ExtractError>;

    /// Vision re-analysis of only the given low-confidence fields against
    /// the original source bytes.
    async fn reanalyze_fields(
        &self,
        source: &SourceImage,
        fields: &[LowConfidenceField],
    ) -> Result<Vec<FieldAnalysis>, ExtractError>;
}
