// Post-state caching
pub mod eviction;
pub mod metadata;
pub mod post_state_cache;

pub use eviction::{EvictionPolicy, LruEvictionPolicy};
pub use metadata::EntryMetadata;
pub use post_state_cache::{CacheStats, PostStateCache};

use std::sync::Arc;

use super::{Fingerprint, PostState, SiteId};

/// A recorded handler result together with the raw input it was recorded for.
#[derive(Debug)]
pub struct CacheEntry {
    pub raw_input: Arc<[u64]>,
    pub post_state: PostState,
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    pub fn new(raw_input: Arc<[u64]>, post_state: PostState, metadata: EntryMetadata) -> Self {
        Self {
            raw_input,
            post_state,
            metadata,
        }
    }
}

/// What a successful lookup hands back.
///
/// The raw input lets the caller detect a fingerprint collision before using the result.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub raw_input: Arc<[u64]>,
    pub post_state: PostState,
}

impl CacheHit {
    pub fn matches(&self, input: &[u64]) -> bool {
        *self.raw_input == *input
    }
}

/// Result of [`PostStateCache::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new entry took a free slot.
    Inserted,
    /// An entry with the same fingerprint was overwritten.
    Replaced,
    /// A new entry was added after evicting exactly one other entry.
    Evicted { site: SiteId, fingerprint: Fingerprint },
    /// No room could be made; nothing was recorded.
    Skipped,
}

/// Capacity bounds enforced after every insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_per_site: usize,
    pub max_total: usize,
}

/// One entry as seen from outside the cache, used for snapshots.
#[derive(Debug, Clone)]
pub struct ExportedEntry {
    pub fingerprint: Fingerprint,
    pub raw_input: Arc<[u64]>,
    pub post_state: PostState,
    pub hits: u64,
    pub confidence: u32,
}
