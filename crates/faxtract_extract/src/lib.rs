//! External capability seams: OCR and LLM-driven extraction.
//!
//! The pipeline never performs OCR or inference itself; it orchestrates the
//! providers behind these traits. HTTP implementations talk to the
//! configured endpoints; mock implementations script results for tests and
//! local runs.

pub mod confidence;
pub mod extractor;
pub mod format;
pub mod http;
pub mod mock;
pub mod ocr;
pub mod retry;

pub use extractor::{
    ExtractError, Extraction, Extractor, FieldAnalysis, FieldStatus, LowConfidenceField,
    SourceImage, TemplateHint,
};
pub use ocr::{BoundingBox, OcrError, OcrLine, OcrPage, OcrProvider, OcrResult, OcrWord};
pub use retry::Backoff;
