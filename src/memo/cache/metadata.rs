use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Bookkeeping attached to every cache entry.
///
/// All counters are atomics so a lookup can update them while holding only a read lock.
#[derive(Debug, Default)]
pub struct EntryMetadata {
    last_used: AtomicU64,
    hits: AtomicU64,
    confidence: AtomicU32,
}

impl EntryMetadata {
    pub fn new(tick: u64) -> Self {
        Self {
            last_used: AtomicU64::new(tick),
            hits: AtomicU64::new(0),
            confidence: AtomicU32::new(0),
        }
    }

    /// Metadata for an entry restored from a snapshot: never used in this process, but
    /// carrying the hit count it had when exported.
    pub fn cold(hits: u64) -> Self {
        Self {
            last_used: AtomicU64::new(0),
            hits: AtomicU64::new(hits),
            confidence: AtomicU32::new(0),
        }
    }

    pub fn record_hit(&self, tick: u64) {
        self.last_used.fetch_max(tick, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmation(&self) {
        self.confidence.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn confidence(&self) -> u32 {
        self.confidence.load(Ordering::Relaxed)
    }
}
