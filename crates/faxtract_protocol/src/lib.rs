//! Canonical protocol types for Faxtract.
//!
//! Every crate in the workspace speaks these types: identifiers, the
//! document/record data model, the error taxonomy, the object-store path
//! grammar, and configuration. Nothing here performs I/O.

pub mod config;
pub mod errors;
pub mod hash;
pub mod paths;
pub mod types;

pub use config::{EndpointConfig, PipelineConfig};
pub use errors::{ErrorKind, PipelineError};
pub use hash::{derive_processing_id, sha256_hex};
pub use types::{
    BatchId, Classification, ConfidenceTier, ContentHash, Document, JobId, JobKind, JobRecord,
    JobState, NullFieldRecord, ProcessedRecord, ProcessingId, SupportedMime, TemplateId,
    TemplateMapping, TenantId,
};
