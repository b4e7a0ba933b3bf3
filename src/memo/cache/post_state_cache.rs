use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::{
    CacheEntry, CacheHit, CacheLimits, EntryMetadata, EvictionPolicy, ExportedEntry,
    InsertOutcome, LruEvictionPolicy,
};
use crate::memo::{Fingerprint, PostState, SiteId};

// Bound on how often an insert tries to borrow room from another site before giving up.
const RECLAIM_ATTEMPTS: usize = 4;

type Entries = AHashMap<Fingerprint, CacheEntry>;

#[derive(Debug, Default)]
struct Shard {
    entries: RwLock<Entries>,
}

/// Bounded fingerprint -> post-state store, sharded per call site.
///
/// Lookups only take read locks, so any number of threads can query concurrently. Inserts
/// and invalidations lock the shard of their own call site; other sites are untouched
/// unless the global budget forces an eviction there, in which case the least recently
/// used entry across all sites gives way.
pub struct PostStateCache {
    shards: RwLock<AHashMap<SiteId, Arc<Shard>>>,
    policy: Box<dyn EvictionPolicy>,
    limits: CacheLimits,
    total: AtomicUsize,
    // Starts at 1: tick 0 is reserved for entries restored cold from a snapshot.
    clock: AtomicU64,
}

impl PostStateCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self::with_policy(limits, Box::new(LruEvictionPolicy::new()))
    }

    pub fn with_policy(limits: CacheLimits, policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            shards: RwLock::new(AHashMap::new()),
            policy,
            limits,
            total: AtomicUsize::new(0),
            clock: AtomicU64::new(1),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Looks up a recorded post-state and marks the entry as used.
    pub fn lookup(&self, site: SiteId, fingerprint: Fingerprint) -> Option<CacheHit> {
        let shard = self.shard(site)?;
        let entries = shard.entries.read();
        let entry = entries.get(&fingerprint)?;
        entry.metadata.record_hit(self.tick());
        Some(CacheHit {
            raw_input: Arc::clone(&entry.raw_input),
            post_state: entry.post_state.clone(),
        })
    }

    /// Records (or overwrites) the post-state for a context.
    ///
    /// On return `entry_count(site) <= max_per_site` and `total_entries() <= max_total`.
    pub fn insert(
        &self,
        site: SiteId,
        fingerprint: Fingerprint,
        raw_input: Arc<[u64]>,
        post_state: PostState,
    ) -> InsertOutcome {
        let metadata = EntryMetadata::new(self.tick());
        self.insert_entry(site, fingerprint, CacheEntry::new(raw_input, post_state, metadata))
    }

    /// Like [`insert`](Self::insert), but the entry starts as the least recently used one,
    /// carrying `hits` from a previous run.
    pub fn insert_cold(
        &self,
        site: SiteId,
        fingerprint: Fingerprint,
        raw_input: Arc<[u64]>,
        post_state: PostState,
        hits: u64,
    ) -> InsertOutcome {
        let metadata = EntryMetadata::cold(hits);
        self.insert_entry(site, fingerprint, CacheEntry::new(raw_input, post_state, metadata))
    }

    fn insert_entry(
        &self,
        site: SiteId,
        fingerprint: Fingerprint,
        entry: CacheEntry,
    ) -> InsertOutcome {
        let shard = self.shard_or_create(site);
        let mut reclaimed = None;
        let mut evict_own = false;

        for _ in 0..RECLAIM_ATTEMPTS {
            let mut entries = shard.entries.write();

            if let Some(existing) = entries.get_mut(&fingerprint) {
                *existing = entry;
                return InsertOutcome::Replaced;
            }

            let site_full = entries.len() >= self.limits.max_per_site;
            if site_full || !self.try_reserve() {
                if site_full || evict_own {
                    if let Some(victim) = self.policy.select_victim(&entries) {
                        entries.remove(&victim);
                        entries.insert(fingerprint, entry);
                        debug!(site = %site, victim = %victim, "evicted post-state entry");
                        return InsertOutcome::Evicted {
                            site,
                            fingerprint: victim,
                        };
                    }
                }

                // Global budget exhausted: the stalest entry of any site gives way.
                let own_oldest = self
                    .policy
                    .select_victim(&entries)
                    .and_then(|victim| entries.get(&victim))
                    .map(|oldest| self.policy.priority(oldest));
                drop(entries);
                match self.evict_stalest_elsewhere(site, own_oldest) {
                    Some(victim) => {
                        reclaimed = Some(victim);
                        evict_own = false;
                    }
                    None if own_oldest.is_some() => evict_own = true,
                    None => break,
                }
                continue;
            }

            entries.insert(fingerprint, entry);
            return match reclaimed {
                Some((site, fingerprint)) => InsertOutcome::Evicted { site, fingerprint },
                None => InsertOutcome::Inserted,
            };
        }

        debug!(site = %site, fingerprint = %fingerprint, "no room for post-state entry");
        InsertOutcome::Skipped
    }

    /// Bumps the confidence counter of an entry whose result was re-checked and matched.
    pub fn confirm(&self, site: SiteId, fingerprint: Fingerprint) -> bool {
        let Some(shard) = self.shard(site) else {
            return false;
        };
        let entries = shard.entries.read();
        match entries.get(&fingerprint) {
            Some(entry) => {
                entry.metadata.record_confirmation();
                true
            }
            None => false,
        }
    }

    /// Drops every entry recorded for `site`, returning how many were removed.
    pub fn invalidate_site(&self, site: SiteId) -> usize {
        let Some(shard) = self.shard(site) else {
            return 0;
        };
        let mut entries = shard.entries.write();
        let removed = entries.len();
        entries.clear();
        self.total.fetch_sub(removed, Ordering::AcqRel);
        removed
    }

    pub fn contains(&self, site: SiteId, fingerprint: Fingerprint) -> bool {
        self.shard(site)
            .is_some_and(|shard| shard.entries.read().contains_key(&fingerprint))
    }

    pub fn entry_count(&self, site: SiteId) -> usize {
        self.shard(site)
            .map_or(0, |shard| shard.entries.read().len())
    }

    pub fn total_entries(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Confidence counter of an entry, if present.
    pub fn confidence(&self, site: SiteId, fingerprint: Fingerprint) -> Option<u32> {
        let shard = self.shard(site)?;
        let entries = shard.entries.read();
        entries.get(&fingerprint).map(|entry| entry.metadata.confidence())
    }

    /// Sites that have ever had a shard allocated, in ascending order.
    pub fn sites(&self) -> Vec<SiteId> {
        let mut sites: Vec<SiteId> = self.shards.read().keys().copied().collect();
        sites.sort_unstable();
        sites
    }

    /// Copies out the entries of one site, ordered by fingerprint.
    pub fn export_site(&self, site: SiteId) -> Vec<ExportedEntry> {
        let Some(shard) = self.shard(site) else {
            return Vec::new();
        };
        let entries = shard.entries.read();
        let mut exported: Vec<ExportedEntry> = entries
            .iter()
            .map(|(fingerprint, entry)| ExportedEntry {
                fingerprint: *fingerprint,
                raw_input: Arc::clone(&entry.raw_input),
                post_state: entry.post_state.clone(),
                hits: entry.metadata.hits(),
                confidence: entry.metadata.confidence(),
            })
            .collect();
        exported.sort_unstable_by_key(|entry| entry.fingerprint);
        exported
    }

    pub fn clear(&self) {
        let shards: Vec<Arc<Shard>> = self.shards.read().values().cloned().collect();
        for shard in shards {
            let mut entries = shard.entries.write();
            self.total.fetch_sub(entries.len(), Ordering::AcqRel);
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let total_entries = self.total_entries();
        CacheStats {
            sites: self.shards.read().len(),
            total_entries,
            max_total_entries: self.limits.max_total,
            max_entries_per_site: self.limits.max_per_site,
            usage_percent: (total_entries as f64 / self.limits.max_total as f64) * 100.0,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn try_reserve(&self) -> bool {
        self.total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.limits.max_total).then_some(count + 1)
            })
            .is_ok()
    }

    fn shard(&self, site: SiteId) -> Option<Arc<Shard>> {
        self.shards.read().get(&site).cloned()
    }

    fn shard_or_create(&self, site: SiteId) -> Arc<Shard> {
        if let Some(shard) = self.shard(site) {
            return shard;
        }
        Arc::clone(self.shards.write().entry(site).or_default())
    }

    /// Evicts the stalest entry held by a site other than `requester`, provided it ranks
    /// below `own_oldest`, the requester's own best victim.
    ///
    /// The freed slot goes back to the global budget; the caller has to win it again.
    fn evict_stalest_elsewhere(
        &self,
        requester: SiteId,
        own_oldest: Option<(u64, u64)>,
    ) -> Option<(SiteId, Fingerprint)> {
        let others: Vec<(SiteId, Arc<Shard>)> = self
            .shards
            .read()
            .iter()
            .filter(|(site, _)| **site != requester)
            .map(|(site, shard)| (*site, Arc::clone(shard)))
            .collect();

        let mut stalest: Option<((u64, u64), SiteId, Arc<Shard>)> = None;
        for (site, shard) in others {
            let priority = {
                let entries = shard.entries.read();
                let Some(victim) = self.policy.select_victim(&entries) else {
                    continue;
                };
                let Some(entry) = entries.get(&victim) else {
                    continue;
                };
                self.policy.priority(entry)
            };
            if own_oldest.is_some_and(|own| priority >= own) {
                continue;
            }
            if stalest
                .as_ref()
                .is_none_or(|(best, best_site, _)| (priority, site) < (*best, *best_site))
            {
                stalest = Some((priority, site, shard));
            }
        }

        let (_, site, shard) = stalest?;
        let mut entries = shard.entries.write();
        let victim = self.policy.select_victim(&entries)?;
        entries.remove(&victim);
        self.total.fetch_sub(1, Ordering::AcqRel);
        debug!(site = %site, victim = %victim, requester = %requester, "evicted post-state entry for another site");
        Some((site, victim))
    }
}

impl std::fmt::Debug for PostStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostStateCache")
            .field("limits", &self.limits)
            .field("total", &self.total_entries())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub sites: usize,
    pub total_entries: usize,
    pub max_total_entries: usize,
    pub max_entries_per_site: usize,
    pub usage_percent: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_per_site: usize, max_total: usize) -> PostStateCache {
        PostStateCache::new(CacheLimits {
            max_per_site,
            max_total,
        })
    }

    fn put(cache: &PostStateCache, site: u64, key: u64) -> InsertOutcome {
        cache.insert(
            SiteId(site),
            Fingerprint(key),
            vec![key].into(),
            PostState::new(key).with_write(10, key + 7),
        )
    }

    #[test]
    fn lookup_returns_recorded_state_and_raw_input() {
        let cache = cache(4, 16);
        assert_eq!(put(&cache, 1, 5), InsertOutcome::Inserted);

        let hit = cache.lookup(SiteId(1), Fingerprint(5)).expect("entry");
        assert!(hit.matches(&[5]));
        assert!(!hit.matches(&[3]));
        assert_eq!(hit.post_state.value_of(10), Some(12));
        assert!(cache.lookup(SiteId(2), Fingerprint(5)).is_none());
    }

    #[test]
    fn overwrite_keeps_counts() {
        let cache = cache(2, 2);
        put(&cache, 1, 5);
        assert_eq!(put(&cache, 1, 5), InsertOutcome::Replaced);
        assert_eq!(cache.entry_count(SiteId(1)), 1);
        assert_eq!(cache.total_entries(), 1);
    }

    #[test]
    fn per_site_limit_evicts_least_recent() {
        let cache = cache(1, 16);
        put(&cache, 1, 5);
        assert_eq!(
            put(&cache, 1, 3),
            InsertOutcome::Evicted {
                site: SiteId(1),
                fingerprint: Fingerprint(5)
            }
        );
        assert!(cache.lookup(SiteId(1), Fingerprint(5)).is_none());
        assert!(cache.contains(SiteId(1), Fingerprint(3)));
    }

    #[test]
    fn lookup_refreshes_recency() {
        let cache = cache(2, 16);
        put(&cache, 1, 1);
        put(&cache, 1, 2);
        cache.lookup(SiteId(1), Fingerprint(1));
        put(&cache, 1, 3);

        assert!(cache.contains(SiteId(1), Fingerprint(1)));
        assert!(!cache.contains(SiteId(1), Fingerprint(2)));
    }

    #[test]
    fn one_hot_site_cannot_starve_another() {
        let cache = cache(2, 16);
        for key in 0..10 {
            put(&cache, 1, key);
        }
        put(&cache, 2, 100);

        assert_eq!(cache.entry_count(SiteId(1)), 2);
        assert_eq!(cache.entry_count(SiteId(2)), 1);
        assert_eq!(cache.total_entries(), 3);
    }

    #[test]
    fn global_limit_reclaims_least_recent_entry_of_any_site() {
        let cache = cache(4, 3);
        put(&cache, 1, 1);
        put(&cache, 1, 2);
        put(&cache, 2, 3);

        let outcome = put(&cache, 3, 4);
        assert_eq!(
            outcome,
            InsertOutcome::Evicted {
                site: SiteId(1),
                fingerprint: Fingerprint(1)
            }
        );
        assert_eq!(cache.total_entries(), 3);
        assert_eq!(cache.entry_count(SiteId(1)), 1);
        assert!(cache.contains(SiteId(3), Fingerprint(4)));
    }

    #[test]
    fn global_limit_takes_stale_entry_from_another_site() {
        let cache = cache(4, 2);
        put(&cache, 1, 1);
        put(&cache, 2, 2);

        assert_eq!(
            put(&cache, 2, 3),
            InsertOutcome::Evicted {
                site: SiteId(1),
                fingerprint: Fingerprint(1)
            }
        );
        assert_eq!(cache.entry_count(SiteId(1)), 0);
        assert_eq!(cache.entry_count(SiteId(2)), 2);
    }

    #[test]
    fn global_limit_evicts_own_entry_when_it_is_oldest() {
        let cache = cache(4, 2);
        put(&cache, 2, 2);
        put(&cache, 1, 1);

        assert_eq!(
            put(&cache, 2, 3),
            InsertOutcome::Evicted {
                site: SiteId(2),
                fingerprint: Fingerprint(2)
            }
        );
        assert_eq!(cache.entry_count(SiteId(1)), 1);
        assert_eq!(cache.entry_count(SiteId(2)), 1);
        assert_eq!(cache.total_entries(), 2);
    }

    #[test]
    fn idle_site_gives_way_to_a_hot_one_under_global_pressure() {
        let cache = cache(8, 8);
        for key in 0..8 {
            put(&cache, 1, key);
        }

        let mut misses = 0;
        for _ in 0..50 {
            for key in 100..104 {
                if cache.lookup(SiteId(2), Fingerprint(key)).is_none() {
                    misses += 1;
                    put(&cache, 2, key);
                }
            }
        }

        assert_eq!(misses, 4);
        assert_eq!(cache.entry_count(SiteId(2)), 4);
        assert_eq!(cache.entry_count(SiteId(1)), 4);
        assert_eq!(cache.total_entries(), 8);
    }

    #[test]
    fn capacity_invariant_holds_after_every_insert() {
        let cache = cache(3, 7);
        for step in 0..200u64 {
            put(&cache, step % 5, step.wrapping_mul(0x9e37_79b9) % 23);
            assert!(cache.total_entries() <= 7);
            for site in 0..5 {
                assert!(cache.entry_count(SiteId(site)) <= 3);
            }
        }
    }

    #[test]
    fn invalidate_site_releases_budget() {
        let cache = cache(4, 4);
        put(&cache, 1, 1);
        put(&cache, 1, 2);
        put(&cache, 2, 3);

        assert_eq!(cache.invalidate_site(SiteId(1)), 2);
        assert_eq!(cache.total_entries(), 1);
        assert_eq!(cache.entry_count(SiteId(1)), 0);
        assert_eq!(cache.invalidate_site(SiteId(9)), 0);
    }

    #[test]
    fn cold_entries_are_evicted_first() {
        let cache = cache(2, 8);
        cache.insert_cold(SiteId(1), Fingerprint(1), vec![1].into(), PostState::new(1), 9);
        put(&cache, 1, 2);
        put(&cache, 1, 3);

        assert!(!cache.contains(SiteId(1), Fingerprint(1)));
        assert!(cache.contains(SiteId(1), Fingerprint(2)));
    }

    #[test]
    fn confirm_counts_confidence() {
        let cache = cache(2, 8);
        put(&cache, 1, 1);
        assert!(cache.confirm(SiteId(1), Fingerprint(1)));
        assert!(cache.confirm(SiteId(1), Fingerprint(1)));
        assert!(!cache.confirm(SiteId(1), Fingerprint(2)));
        assert_eq!(cache.confidence(SiteId(1), Fingerprint(1)), Some(2));
    }

    #[test]
    fn clear_empties_every_site_but_keeps_shards() {
        let cache = cache(4, 8);
        put(&cache, 1, 1);
        put(&cache, 2, 2);
        cache.clear();

        assert_eq!(cache.total_entries(), 0);
        assert_eq!(cache.sites(), vec![SiteId(1), SiteId(2)]);
        assert_eq!(put(&cache, 1, 1), InsertOutcome::Inserted);
    }
}
