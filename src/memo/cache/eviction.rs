use ahash::AHashMap;

use super::CacheEntry;
use crate::memo::Fingerprint;

/// Chooses which entry of a full call-site shard gives way to a new one.
pub trait EvictionPolicy: Send + Sync {
    /// Picks the victim among `entries`, or `None` if the shard is empty.
    fn select_victim(&self, entries: &AHashMap<Fingerprint, CacheEntry>) -> Option<Fingerprint>;

    /// Orders the victims of different shards when the global budget runs out; the lowest
    /// goes first. Defaults to recency, then hit count.
    fn priority(&self, entry: &CacheEntry) -> (u64, u64) {
        (entry.metadata.last_used(), entry.metadata.hits())
    }
}

/// Least-recently-used eviction.
///
/// Ties on recency go to the entry with fewer hits, then to the lower fingerprint so the
/// choice never depends on hash-map iteration order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LruEvictionPolicy;

impl LruEvictionPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl EvictionPolicy for LruEvictionPolicy {
    fn select_victim(&self, entries: &AHashMap<Fingerprint, CacheEntry>) -> Option<Fingerprint> {
        entries
            .iter()
            .min_by_key(|(fingerprint, entry)| {
                (entry.metadata.last_used(), entry.metadata.hits(), **fingerprint)
            })
            .map(|(fingerprint, _)| *fingerprint)
    }
}
