//! HTTP implementations of the capability seams.
//!
//! Payloads carry the document as base64 so the providers stay plain JSON
//! endpoints. Connection-level failures and 5xx responses count as
//! transient; everything else is a hard provider failure.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;

use faxtract_protocol::types::{Classification, SupportedMime};

use crate::extractor::{
    ExtractError, Extraction, Extractor, FieldAnalysis, LowConfidenceField, SourceImage,
    TemplateHint,
};
use crate::ocr::{OcrError, OcrProvider, OcrResult};
use faxtract_protocol::config::EndpointConfig;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// OCR over a JSON HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpOcrProvider {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpOcrProvider {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl OcrProvider for HttpOcrProvider {
    async fn extract(&self, bytes: &[u8], mime: SupportedMime) -> Result<OcrResult, OcrError> {
        let body = json!({
            "content": B64.encode(bytes),
            "mime_type": mime.as_mime(),
        });

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_connect() || err.is_timeout() {
                OcrError::Transient(err.to_string())
            } else {
                OcrError::Unavailable(err.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(OcrError::Transient(format!("OCR endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(OcrError::Unavailable(format!(
                "OCR endpoint returned {status}"
            )));
        }

        response
            .json::<OcrResult>()
            .await
            .map_err(|err| OcrError::Unavailable(format!("malformed OCR response: {err}")))
    }
}

#[derive(Debug, Deserialize)]
struct ExtractionWire {
    #[serde(default)]
    kv_pairs: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    kv_confidences: std::collections::BTreeMap<String, f64>,
    #[serde(default)]
    kv_spans: std::collections::BTreeMap<String, crate::ocr::BoundingBox>,
    #[serde(default)]
    classification: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

impl From<ExtractionWire> for Extraction {
    fn from(wire: ExtractionWire) -> Self {
        Extraction {
            kv_pairs: wire.kv_pairs,
            kv_confidences: wire.kv_confidences,
            kv_spans: wire.kv_spans,
            classification: wire
                .classification
                .as_deref()
                .map(Classification::parse)
                .unwrap_or_default(),
            summary: wire.summary,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a TemplateHint>,
}

/// Key/value extraction over a JSON HTTP endpoint. Free-form and
/// template-guided modes share one route; re-analysis posts to
/// `{endpoint}/reanalyze`.
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpExtractor {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn post_extraction(
        &self,
        ocr: &OcrResult,
        template: Option<&TemplateHint>,
    ) -> Result<Extraction, ExtractError> {
        let body = ExtractRequest {
            raw_text: ocr.raw_text(),
            template,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ExtractError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Failed(format!(
                "extractor endpoint returned {status}"
            )));
        }

        let wire = response
            .json::<ExtractionWire>()
            .await
            .map_err(|err| ExtractError::Malformed(err.to_string()))?;
        Ok(wire.into())
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, ocr: &OcrResult) -> Result<Extraction, ExtractError> {
        self.post_extraction(ocr, None).await
    }

    async fn extract_with_template(
        &self,
        ocr: &OcrResult,
        template: &TemplateHint,
    ) -> Result<Extraction, ExtractError> {
        self.post_extraction(ocr, Some(template)).await
    }

    async fn reanalyze_fields(
        &self,
        source: &SourceImage,
        fields: &[LowConfidenceField],
    ) -> Result<Vec<FieldAnalysis>, ExtractError> {
        let url = format!("{}/reanalyze", self.config.endpoint.trim_end_matches('/'));
        let body = json!({
            "content": B64.encode(&source.bytes),
            "mime_type": source.mime.as_mime(),
            "fields": fields,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ExtractError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Failed(format!(
                "re-analysis endpoint returned {status}"
            )));
        }

        response
            .json::<Vec<FieldAnalysis>>()
            .await
            .map_err(|err| ExtractError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_extraction_parses_loose_classification() {
        let wire: ExtractionWire = serde_json::from_str(
            r#"{
                "kv_pairs": {"Patient Name": "John Doe"},
                "kv_confidences": {"Patient Name": 0.97},
                "classification": "medical"
            }"#,
        )
        .unwrap();
        let extraction: Extraction = wire.into();
        assert_eq!(extraction.classification, Classification::Medical);
        assert_eq!(extraction.kv_pairs["Patient Name"], "John Doe");
    }

    #[test]
    fn wire_extraction_defaults() {
        let wire: ExtractionWire = serde_json::from_str("{}").unwrap();
        let extraction: Extraction = wire.into();
        assert_eq!(extraction.classification, Classification::Other);
        assert!(extraction.kv_pairs.is_empty());
    }
}
