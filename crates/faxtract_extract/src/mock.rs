//! Scripted capability providers for local runs and tests.
//!
//! These do not call any real service. Responses are either a fixed
//! fallback or a front-to-back script; call counts are observable so tests
//! can assert retry behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use faxtract_protocol::types::SupportedMime;

use crate::extractor::{
    ExtractError, Extraction, Extractor, FieldAnalysis, LowConfidenceField, SourceImage,
    TemplateHint,
};
use crate::ocr::{OcrError, OcrProvider, OcrResult};

/// One scripted OCR response.
pub enum OcrScript {
    Ok(OcrResult),
    Transient(String),
    Unavailable(String),
}

/// OCR provider that replays a script, then falls back to a fixed result.
pub struct MockOcr {
    script: Mutex<VecDeque<OcrScript>>,
    fallback: Option<OcrResult>,
    calls: AtomicUsize,
}

impl MockOcr {
    /// Always return the same result.
    pub fn returning(result: OcrResult) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(result),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replay the script in order; once exhausted, use the fallback or
    /// report the provider as unavailable.
    pub fn scripted(script: Vec<OcrScript>, fallback: Option<OcrResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrProvider for MockOcr {
    async fn extract(&self, _bytes: &[u8], _mime: SupportedMime) -> Result<OcrResult, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front();
        match next {
            Some(OcrScript::Ok(result)) => Ok(result),
            Some(OcrScript::Transient(msg)) => Err(OcrError::Transient(msg)),
            Some(OcrScript::Unavailable(msg)) => Err(OcrError::Unavailable(msg)),
            None => match &self.fallback {
                Some(result) => Ok(result.clone()),
                None => Err(OcrError::Unavailable("mock script exhausted".to_string())),
            },
        }
    }
}

/// Extractor that returns fixed responses.
pub struct MockExtractor {
    extraction: Option<Extraction>,
    analyses: Vec<FieldAnalysis>,
    fail_with: Mutex<Option<ExtractError>>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn returning(extraction: Extraction) -> Self {
        Self {
            extraction: Some(extraction),
            analyses: Vec::new(),
            fail_with: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next extraction call once, then behave normally.
    pub fn failing_once(extraction: Extraction, error: ExtractError) -> Self {
        Self {
            extraction: Some(extraction),
            analyses: Vec::new(),
            fail_with: Mutex::new(Some(error)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail extraction.
    pub fn broken(error_message: impl Into<String>) -> Self {
        let msg = error_message.into();
        Self {
            extraction: None,
            analyses: Vec::new(),
            fail_with: Mutex::new(Some(ExtractError::Failed(msg))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_analyses(mut self, analyses: Vec<FieldAnalysis>) -> Self {
        self.analyses = analyses;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<Extraction, ExtractError> {
        if let Some(err) = self.fail_with.lock().expect("mock lock poisoned").take() {
            return Err(err);
        }
        match &self.extraction {
            Some(extraction) => Ok(extraction.clone()),
            None => Err(ExtractError::Failed("mock has no extraction".to_string())),
        }
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, _ocr: &OcrResult) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next()
    }

    async fn extract_with_template(
        &self,
        _ocr: &OcrResult,
        _template: &TemplateHint,
    ) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next()
    }

    async fn reanalyze_fields(
        &self,
        _source: &SourceImage,
        fields: &[LowConfidenceField],
    ) -> Result<Vec<FieldAnalysis>, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let requested: std::collections::HashSet<&str> =
            fields.iter().map(|f| f.name.as_str()).collect();
        Ok(self
            .analyses
            .iter()
            .filter(|analysis| requested.contains(analysis.field.as_str()))
            .cloned()
            .collect())
    }
}

/// Convenience OCR result builder for tests and the mock CLI mode.
pub fn ocr_result_with_lines(lines: &[(&str, f64)]) -> OcrResult {
    OcrResult {
        pages: vec![crate::ocr::OcrPage {
            number: 0,
            width: 612.0,
            height: 792.0,
        }],
        lines: lines
            .iter()
            .map(|(text, confidence)| crate::ocr::OcrLine {
                text: text.to_string(),
                bbox: None,
                confidence: *confidence,
                page: 0,
            })
            .collect(),
        words: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_ocr_replays_then_falls_back() {
        let ocr = MockOcr::scripted(
            vec![OcrScript::Transient("502".to_string())],
            Some(ocr_result_with_lines(&[("hello", 0.9)])),
        );

        let err = ocr.extract(b"x", SupportedMime::Pdf).await.unwrap_err();
        assert!(err.is_transient());

        let result = ocr.extract(b"x", SupportedMime::Pdf).await.unwrap();
        assert_eq!(result.lines.len(), 1);
        assert_eq!(ocr.calls(), 2);
    }

    #[tokio::test]
    async fn failing_once_extractor_recovers() {
        let extractor = MockExtractor::failing_once(
            Extraction::default(),
            ExtractError::Failed("first call".to_string()),
        );
        assert!(extractor.extract(&OcrResult::default()).await.is_err());
        assert!(extractor.extract(&OcrResult::default()).await.is_ok());
    }
}
