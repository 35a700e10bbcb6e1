//! Time-bounded cache of source bytes for on-demand re-analysis.
//!
//! Entries expire after the configured TTL so completed documents do not
//! pin their upload bytes in memory indefinitely.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use faxtract_protocol::types::{ProcessingId, SupportedMime};

struct Entry {
    bytes: Vec<u8>,
    mime: SupportedMime,
    expires_at: Instant,
}

/// TTL cache keyed by processing id.
pub struct SourceCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SourceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, processing_id: &ProcessingId, bytes: Vec<u8>, mime: SupportedMime) {
        let mut entries = self.entries.lock().expect("source cache lock poisoned");
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            processing_id.as_str().to_string(),
            Entry {
                bytes,
                mime,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn get(&self, processing_id: &ProcessingId) -> Option<(Vec<u8>, SupportedMime)> {
        let entries = self.entries.lock().expect("source cache lock poisoned");
        let entry = entries.get(processing_id.as_str())?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some((entry.bytes.clone(), entry.mime))
    }

    /// Drop a record's bytes once the optional immediate re-analysis has
    /// run or been declined.
    pub fn release(&self, processing_id: &ProcessingId) {
        self.entries
            .lock()
            .expect("source cache lock poisoned")
            .remove(processing_id.as_str());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("source cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let cache = SourceCache::new(Duration::from_millis(0));
        let pid = ProcessingId::from_string("p1");
        cache.insert(&pid, b"bytes".to_vec(), SupportedMime::Pdf);
        assert!(cache.get(&pid).is_none());
    }

    #[test]
    fn live_entries_are_served_and_releasable() {
        let cache = SourceCache::new(Duration::from_secs(600));
        let pid = ProcessingId::from_string("p1");
        cache.insert(&pid, b"bytes".to_vec(), SupportedMime::Jpeg);

        let (bytes, mime) = cache.get(&pid).unwrap();
        assert_eq!(bytes, b"bytes");
        assert_eq!(mime, SupportedMime::Jpeg);

        cache.release(&pid);
        assert!(cache.get(&pid).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_purges_expired_entries() {
        let cache = SourceCache::new(Duration::from_millis(0));
        cache.insert(
            &ProcessingId::from_string("stale"),
            vec![0u8; 16],
            SupportedMime::Png,
        );
        cache.insert(
            &ProcessingId::from_string("stale2"),
            vec![0u8; 16],
            SupportedMime::Png,
        );
        // The second insert retains only unexpired entries plus itself.
        assert_eq!(cache.len(), 1);
    }
}
