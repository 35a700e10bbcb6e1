//! Durable task scheduling.
//!
//! Jobs live as rows in the record store; a pool of in-process workers
//! claims and executes them against the pipeline, and a periodic sweep
//! ingests files dropped under the watched object-store prefix outside
//! the API.

mod cancel;
mod queue;
mod sweep;
mod worker;

pub use cancel::CancellationToken;
pub use queue::{BatchStatus, BatchSubmission, JobPayload, JobQueue, JobSource};
pub use sweep::{SweepReport, Sweeper};
pub use worker::WorkerPool;
