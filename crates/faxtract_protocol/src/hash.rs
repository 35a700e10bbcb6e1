//! Content hashing and processing-id derivation.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Derive a processing id from a content hash and the ingest time.
///
/// The filename never participates; identical bytes uploaded under a
/// different name derive the same prefix and dedupe through the record
/// store before a second id is ever persisted.
pub fn derive_processing_id(content_hash: &str, epoch_ms: i64) -> String {
    let prefix = &content_hash[..content_hash.len().min(16)];
    format!("{prefix}-{epoch_ms}")
}
