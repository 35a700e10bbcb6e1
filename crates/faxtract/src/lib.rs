//! Faxtract service crate.
//!
//! Wires the pipeline, queue, and template registry behind the ingress
//! facade the API collaborator calls, plus the outbound FHIR publisher.
//! The binary in `main.rs` drives the same facade from the command line.

pub mod publish;
pub mod service;
pub mod telemetry;

pub use publish::{FhirPublisher, HttpFhirPublisher, LogFhirPublisher};
pub use service::{IngestFile, ProcessResponse, Service};
