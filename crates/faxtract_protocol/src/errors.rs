//! Error taxonomy for the document pipeline.
//!
//! Components never surface raw upstream errors; everything a caller sees
//! is one of these kinds. The orchestrator only matches on declared kinds,
//! never on generic error types.

use thiserror::Error;

/// Stable error kind tags surfaced to callers and stamped on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    UnsupportedMime,
    TooLarge,
    Duplicate,
    Busy,
    NotFound,
    OcrTransient,
    OcrUnavailable,
    ExtractFail,
    StoreTransient,
    Timeout,
    RelocFail,
    UpstreamUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::UnsupportedMime => "UNSUPPORTED_MIME",
            Self::TooLarge => "TOO_LARGE",
            Self::Duplicate => "DUPLICATE",
            Self::Busy => "BUSY",
            Self::NotFound => "NOT_FOUND",
            Self::OcrTransient => "OCR_TRANSIENT",
            Self::OcrUnavailable => "OCR_UNAVAILABLE",
            Self::ExtractFail => "EXTRACT_FAIL",
            Self::StoreTransient => "STORE_TRANSIENT",
            Self::Timeout => "TIMEOUT",
            Self::RelocFail => "RELOC_FAIL",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unsupported mime type: {0}")]
    UnsupportedMime(String),

    #[error("file too large: {size_bytes} bytes (max {max_bytes})")]
    TooLarge { size_bytes: u64, max_bytes: u64 },

    /// Same bytes already processed. Carries the existing processing id so
    /// the caller can resolve to the original record.
    #[error("duplicate content, existing processing id: {0}")]
    Duplicate(String),

    #[error("queue is at capacity")]
    Busy,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("OCR transient failure: {0}")]
    OcrTransient(String),

    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    #[error("extraction failed: {0}")]
    ExtractFail(String),

    #[error("store transient failure: {0}")]
    StoreTransient(String),

    #[error("deadline exceeded after {0} s")]
    Timeout(u64),

    #[error("relocation failed: {0}")]
    RelocFail(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::UnsupportedMime(_) => ErrorKind::UnsupportedMime,
            Self::TooLarge { .. } => ErrorKind::TooLarge,
            Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::Busy => ErrorKind::Busy,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::OcrTransient(_) => ErrorKind::OcrTransient,
            Self::OcrUnavailable(_) => ErrorKind::OcrUnavailable,
            Self::ExtractFail(_) => ErrorKind::ExtractFail,
            Self::StoreTransient(_) => ErrorKind::StoreTransient,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::RelocFail(_) => ErrorKind::RelocFail,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry with backoff is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::OcrTransient(_) | Self::StoreTransient(_))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_tags() {
        assert_eq!(ErrorKind::UnsupportedMime.as_str(), "UNSUPPORTED_MIME");
        assert_eq!(
            PipelineError::Timeout(120).kind().as_str(),
            "TIMEOUT"
        );
    }

    #[test]
    fn transience() {
        assert!(PipelineError::OcrTransient("502".into()).is_transient());
        assert!(PipelineError::StoreTransient("io".into()).is_transient());
        assert!(!PipelineError::OcrUnavailable("down".into()).is_transient());
        assert!(!PipelineError::Busy.is_transient());
    }
}
