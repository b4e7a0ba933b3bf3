use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for everything the engine does on behalf of its callers.
#[derive(Debug, Default)]
pub struct MemoMetrics {
    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    collisions: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    skipped_inserts: AtomicU64,
    validations: AtomicU64,
    confirmations: AtomicU64,
    purity_violations: AtomicU64,
    bypassed_calls: AtomicU64,
    handler_failures: AtomicU64,
}

impl MemoMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A fingerprint matched but the stored raw input did not.
    pub fn record_collision(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self, evicted: bool) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skipped_insert(&self) {
        self.skipped_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation(&self, consistent: bool) {
        self.validations.fetch_add(1, Ordering::Relaxed);
        if consistent {
            self.confirmations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_purity_violation(&self) {
        self.purity_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypass(&self) {
        self.bypassed_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MemoMetricsSnapshot {
        MemoMetricsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            skipped_inserts: self.skipped_inserts.load(Ordering::Relaxed),
            validations: self.validations.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            purity_violations: self.purity_violations.load(Ordering::Relaxed),
            bypassed_calls: self.bypassed_calls.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoMetricsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub collisions: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub skipped_inserts: u64,
    pub validations: u64,
    pub confirmations: u64,
    pub purity_violations: u64,
    pub bypassed_calls: u64,
    pub handler_failures: u64,
}

impl MemoMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}
