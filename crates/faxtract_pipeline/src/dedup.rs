//! Content-hash deduplication gate.
//!
//! Consulted before any object-store write. The answer is advisory; the
//! final atomicity guard is the record store's unique content-hash index.

use faxtract_db::FaxtractDb;
use faxtract_protocol::errors::PipelineError;
use faxtract_protocol::types::{ContentHash, ProcessedRecord, TenantId};

use crate::convert::from_db;

/// Gate verdict for one upload.
#[derive(Debug)]
pub enum DupCheck {
    /// No record with these bytes; proceed.
    Fresh,
    /// Same tenant already processed these bytes.
    Duplicate(Box<ProcessedRecord>),
    /// Another tenant owns these bytes. Surfaced as a conflict without
    /// leaking the foreign record.
    ForeignTenant,
}

pub struct DedupGate {
    db: FaxtractDb,
}

impl DedupGate {
    pub fn new(db: FaxtractDb) -> Self {
        Self { db }
    }

    pub async fn check(
        &self,
        content_hash: &ContentHash,
        tenant_id: &TenantId,
    ) -> Result<DupCheck, PipelineError> {
        match self.db.find_by_hash(content_hash).await.map_err(from_db)? {
            None => Ok(DupCheck::Fresh),
            Some(record) if &record.tenant_id == tenant_id => {
                Ok(DupCheck::Duplicate(Box::new(record)))
            }
            Some(_) => Ok(DupCheck::ForeignTenant),
        }
    }
}
