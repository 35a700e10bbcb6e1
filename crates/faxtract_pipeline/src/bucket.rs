//! Confidence-based placement and relocation.

use std::sync::Arc;

use tracing::{info, warn};

use faxtract_protocol::errors::PipelineError;
use faxtract_protocol::paths;
use faxtract_protocol::types::{ConfidenceTier, ProcessedRecord};
use faxtract_store::ObjectStore;

use crate::convert::from_store;

/// Pure placement decision from overall confidence.
#[derive(Debug, Clone, Copy)]
pub struct BucketPolicy {
    threshold: f64,
}

impl BucketPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn bucket(&self, confidence: f64) -> ConfidenceTier {
        if confidence >= self.threshold {
            ConfidenceTier::HighConfidence
        } else {
            ConfidenceTier::NeedsReview
        }
    }
}

/// Paths produced by a relocation.
#[derive(Debug, Clone)]
pub struct RelocatedPaths {
    pub source_path: String,
    pub processed_path: String,
}

/// Translates a record's tier change into source and processed-JSON moves,
/// preserving processing id and epoch millis inside the keys.
pub struct Relocator {
    store: Arc<dyn ObjectStore>,
}

impl Relocator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Move both objects into the target tier. The source moves first; if
    /// the processed-JSON move fails the source is put back (best effort)
    /// so the record never straddles tiers.
    pub async fn relocate(
        &self,
        record: &ProcessedRecord,
        target: ConfidenceTier,
    ) -> Result<RelocatedPaths, PipelineError> {
        let new_source = paths::retarget_tier(&record.source_path, target).ok_or_else(|| {
            PipelineError::internal(format!("untiered source path: {}", record.source_path))
        })?;
        let new_processed =
            paths::retarget_tier(&record.processed_path, target).ok_or_else(|| {
                PipelineError::internal(format!(
                    "untiered processed path: {}",
                    record.processed_path
                ))
            })?;

        self.store
            .move_object(&record.source_path, &new_source)
            .await
            .map_err(|err| PipelineError::RelocFail(err.to_string()))?;

        if let Err(err) = self
            .store
            .move_object(&record.processed_path, &new_processed)
            .await
        {
            if let Err(undo) = self.store.move_object(&new_source, &record.source_path).await {
                warn!(
                    processing_id = %record.processing_id,
                    error = %undo,
                    "failed to undo source move after relocation failure"
                );
            }
            return Err(PipelineError::RelocFail(err.to_string()));
        }

        info!(
            processing_id = %record.processing_id,
            tier = target.as_str(),
            "record relocated"
        );
        Ok(RelocatedPaths {
            source_path: new_source,
            processed_path: new_processed,
        })
    }

    /// Best-effort reverse of a completed relocation, used when the record
    /// update after the move fails.
    pub async fn undo(
        &self,
        record: &ProcessedRecord,
        moved: &RelocatedPaths,
    ) -> Result<(), PipelineError> {
        self.store
            .move_object(&moved.source_path, &record.source_path)
            .await
            .map_err(from_store)?;
        self.store
            .move_object(&moved.processed_path, &record.processed_path)
            .await
            .map_err(from_store)?;
        Ok(())
    }
}
