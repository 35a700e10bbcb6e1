//! Confidence arithmetic for extracted records.

use std::collections::BTreeMap;

use crate::ocr::{BoundingBox, OcrWord};

/// Merge keys that collide case-insensitively, keeping the value and
/// casing of the higher-confidence occurrence.
pub fn merge_case_insensitive(
    kv_pairs: BTreeMap<String, String>,
    kv_confidences: BTreeMap<String, f64>,
) -> (BTreeMap<String, String>, BTreeMap<String, f64>) {
    let mut winners: BTreeMap<String, (String, String, f64)> = BTreeMap::new();

    for (key, value) in kv_pairs {
        let confidence = kv_confidences.get(&key).copied().unwrap_or(0.0);
        let folded = key.to_lowercase();
        match winners.get(&folded) {
            Some((_, _, existing)) if *existing >= confidence => {}
            _ => {
                winners.insert(folded, (key, value, confidence));
            }
        }
    }

    let mut merged_kv = BTreeMap::new();
    let mut merged_conf = BTreeMap::new();
    for (_, (key, value, confidence)) in winners {
        merged_kv.insert(key.clone(), value);
        merged_conf.insert(key, confidence);
    }
    (merged_kv, merged_conf)
}

/// Overall confidence: equal-weight blend of OCR and extraction, or OCR
/// alone when nothing was extracted. Clamped into [0, 1].
pub fn overall_confidence(ocr_confidence: f64, kv_confidences: &BTreeMap<String, f64>) -> f64 {
    let overall = if kv_confidences.is_empty() {
        ocr_confidence
    } else {
        let mean = kv_confidences.values().sum::<f64>() / kv_confidences.len() as f64;
        0.5 * ocr_confidence + 0.5 * mean
    };
    overall.clamp(0.0, 1.0)
}

/// Mean confidence of OCR words intersecting a field's bounding span.
/// `None` when no word overlaps, in which case the caller falls back to
/// the extractor's self-reported value.
pub fn span_confidence(words: &[OcrWord], span: &BoundingBox) -> Option<f64> {
    let overlapping: Vec<f64> = words
        .iter()
        .filter(|word| {
            word.bbox
                .as_ref()
                .map(|bbox| bbox.intersects(span))
                .unwrap_or(false)
        })
        .map(|word| word.confidence)
        .collect();
    if overlapping.is_empty() {
        return None;
    }
    Some(overlapping.iter().sum::<f64>() / overlapping.len() as f64)
}

/// Per-pair confidence: positional evidence when available, otherwise the
/// provider's self-reported number.
pub fn resolve_pair_confidence(
    reported: f64,
    span: Option<&BoundingBox>,
    words: &[OcrWord],
) -> f64 {
    span.and_then(|span| span_confidence(words, span))
        .unwrap_or(reported)
        .clamp(0.0, 1.0)
}
