//! OCR capability seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use faxtract_protocol::types::SupportedMime;

/// OCR provider errors. Only `Transient` is retried.
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR transient failure: {0}")]
    Transient(String),

    #[error("OCR unavailable: {0}")]
    Unavailable(String),
}

impl OcrError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Axis-aligned bounding box in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub bbox: Option<BoundingBox>,
    pub confidence: f64,
    /// Zero-based page the line was read from.
    pub page: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bbox: Option<BoundingBox>,
    pub confidence: f64,
    pub page: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPage {
    pub number: usize,
    pub width: f64,
    pub height: f64,
}

/// Text-and-positioning extraction for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub pages: Vec<OcrPage>,
    pub lines: Vec<OcrLine>,
    pub words: Vec<OcrWord>,
}

impl OcrResult {
    /// Full raw text, lines joined by newlines.
    pub fn raw_text(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Arithmetic mean of line confidences over all non-empty lines across
    /// every page. Empty result means 0.0.
    pub fn mean_confidence(&self) -> f64 {
        let non_empty: Vec<f64> = self
            .lines
            .iter()
            .filter(|line| !line.text.trim().is_empty())
            .map(|line| line.confidence)
            .collect();
        if non_empty.is_empty() {
            return 0.0;
        }
        non_empty.iter().sum::<f64>() / non_empty.len() as f64
    }
}

/// Pure capability: text plus positions out of raw bytes.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    async fn extract(&self, bytes: &[u8], mime: SupportedMime) -> Result<OcrResult, OcrError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str, confidence: f64) -> OcrLine {
        OcrLine {
            text: text.to_string(),
            bbox: None,
            confidence,
            page: 0,
        }
    }

    #[test]
    fn mean_ignores_empty_lines() {
        let result = OcrResult {
            pages: vec![],
            lines: vec![line("Patient", 0.9), line("   ", 0.1), line("Doe", 0.7)],
            words: vec![],
        };
        assert!((result.mean_confidence() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn mean_of_empty_result_is_zero() {
        assert_eq!(OcrResult::default().mean_confidence(), 0.0);
    }

    #[test]
    fn bbox_intersection() {
        let a = BoundingBox {
            x0: 0.0,
            y0: 0.0,
            x1: 10.0,
            y1: 10.0,
        };
        let b = BoundingBox {
            x0: 5.0,
            y0: 5.0,
            x1: 15.0,
            y1: 15.0,
        };
        let c = BoundingBox {
            x0: 10.0,
            y0: 10.0,
            x1: 20.0,
            y1: 20.0,
        };
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
