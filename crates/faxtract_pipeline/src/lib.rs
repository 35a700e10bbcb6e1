//! The per-document processing pipeline.
//!
//! Composes the dedup gate, object store, OCR and extraction providers,
//! template registry, bucket policy, and record store into the state
//! machine that turns an upload into a stored, classified,
//! confidence-scored record. Also hosts the flows that mutate records
//! after completion: corrections and low-confidence re-analysis.

mod bucket;
mod cache;
mod convert;
mod correction;
mod dedup;
mod null_fields;
mod orchestrator;
mod processed_json;
mod reanalyze;

pub use bucket::{BucketPolicy, Relocator};
pub use cache::SourceCache;
pub use correction::update_record_kv;
pub use dedup::{DedupGate, DupCheck};
pub use null_fields::{build_null_field_record, REQUIRED_FIELDS};
pub use orchestrator::{
    Pipeline, PipelineContext, PipelineOutcome, PipelineRequest, ProgressFn, StagedSource,
    PROGRESS_COMPLETED, PROGRESS_PLACED,
};
pub use processed_json::processed_record_json;
pub use reanalyze::reanalyze_low_confidence;
