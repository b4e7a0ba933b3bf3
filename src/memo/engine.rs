use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::Fingerprint;
use super::cache::{EvictionPolicy, InsertOutcome, PostStateCache};
use super::fingerprint::{ContextCodec, HashCodec};
use super::metrics::{MemoMetrics, MemoMetricsSnapshot};
use super::site::{CallSite, ReadSet, SiteId, Slot};
use super::state::PostState;
use super::validator::{PurityValidator, PurityViolation, Verdict};
use crate::config::MemoConfig;
use crate::error::{ConfigurationError, DispatchError};

/// Callback invoked once per call site when it is found impure.
pub type ViolationHook = Arc<dyn Fn(&PurityViolation) + Send + Sync>;

/// Memoizing front end for indirect handler calls.
///
/// The interpreter registers each dispatch point once, then routes every indirect call
/// through [`dispatch`](Self::dispatch) instead of calling the handler itself. An engine is
/// `Sync` and can be shared by several interpreter threads.
pub struct MemoEngine {
    config: MemoConfig,
    sites: RwLock<AHashMap<SiteId, CallSite>>,
    codec: Box<dyn ContextCodec>,
    cache: PostStateCache,
    validator: PurityValidator,
    metrics: MemoMetrics,
    violation_hook: Option<ViolationHook>,
}

impl MemoEngine {
    pub fn new(config: MemoConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self::from_checked(config))
    }

    pub(crate) fn from_checked(config: MemoConfig) -> Self {
        Self {
            sites: RwLock::new(AHashMap::new()),
            codec: Box::new(HashCodec::new()),
            cache: PostStateCache::new(config.cache_limits()),
            validator: PurityValidator::new(config.validation_sample_rate),
            metrics: MemoMetrics::new(),
            violation_hook: None,
            config,
        }
    }

    /// Replaces the fingerprint codec. Must happen before the first dispatch.
    pub fn with_codec<C>(mut self, codec: C) -> Self
    where
        C: ContextCodec + 'static,
    {
        self.codec = Box::new(codec);
        self
    }

    /// Replaces the eviction policy. Must happen before the first dispatch.
    pub fn with_eviction_policy<P>(mut self, policy: P) -> Self
    where
        P: EvictionPolicy + 'static,
    {
        self.cache = PostStateCache::with_policy(self.config.cache_limits(), Box::new(policy));
        self
    }

    pub fn with_violation_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PurityViolation) + Send + Sync + 'static,
    {
        self.violation_hook = Some(Arc::new(hook));
        self
    }

    /// Registers a dispatch point and the state slots its handler reads.
    ///
    /// Registering the same id again with the same read set returns the existing handle;
    /// a different read set is rejected.
    pub fn register_call_site(
        &self,
        id: impl Into<SiteId>,
        read_set: impl IntoIterator<Item = Slot>,
    ) -> Result<CallSite, ConfigurationError> {
        let id = id.into();
        let read_set = ReadSet::declare(id, read_set)?;

        let mut sites = self.sites.write();
        if let Some(existing) = sites.get(&id) {
            if *existing.read_set() == read_set {
                return Ok(existing.clone());
            }
            return Err(ConfigurationError::ReadSetConflict { site: id });
        }

        debug!(site = %id, width = read_set.len(), "registered call site");
        let site = CallSite::new(id, read_set);
        sites.insert(id, site.clone());
        Ok(site)
    }

    pub fn call_site(&self, id: impl Into<SiteId>) -> Option<CallSite> {
        self.sites.read().get(&id.into()).cloned()
    }

    /// All registered call sites, ordered by id.
    pub fn call_sites(&self) -> Vec<CallSite> {
        let mut sites: Vec<CallSite> = self.sites.read().values().cloned().collect();
        sites.sort_unstable_by_key(CallSite::id);
        sites
    }

    /// Runs `handler` for `input`, or answers from the cache when that is known to be safe.
    ///
    /// `input` holds the values of the site's read set in declared order. The returned
    /// post-state always equals what `handler(input)` would produce for a pure handler;
    /// when a sampled re-run disagrees with the cache, the fresh result is returned and the
    /// site stops being memoized.
    pub fn dispatch<F, E>(
        &self,
        site: &CallSite,
        input: &[u64],
        handler: F,
    ) -> Result<PostState, DispatchError<E>>
    where
        F: FnOnce(&[u64]) -> Result<PostState, E>,
    {
        let expected = site.read_set().len();
        if input.len() != expected {
            return Err(DispatchError::ContextWidth {
                site: site.id(),
                expected,
                found: input.len(),
            });
        }

        if !site.is_memoizable() {
            self.metrics.record_bypass();
            return self.run(handler, input);
        }

        let fingerprint = self.codec.encode(site.id(), input);
        let Some(hit) = self.cache.lookup(site.id(), fingerprint) else {
            self.metrics.record_miss();
            let post_state = self.run(handler, input)?;
            self.record(site, fingerprint, input, &post_state);
            return Ok(post_state);
        };

        if !hit.matches(input) {
            self.metrics.record_collision();
            warn!(site = %site.id(), fingerprint = %fingerprint, "fingerprint collision, running handler");
            let post_state = self.run(handler, input)?;
            self.record(site, fingerprint, input, &post_state);
            return Ok(post_state);
        }

        self.metrics.record_hit();
        if !self.validator.should_sample() {
            return Ok(hit.post_state);
        }

        let fresh = self.run(handler, input)?;
        match self.validator.check(&hit.post_state, &fresh) {
            Verdict::Consistent => {
                self.metrics.record_validation(true);
                self.cache.confirm(site.id(), fingerprint);
            }
            Verdict::Violation => {
                self.metrics.record_validation(false);
                self.demote(site, fingerprint, hit.post_state, &fresh);
            }
        }
        Ok(fresh)
    }

    /// The fingerprint this engine's codec assigns to a calling context.
    pub fn fingerprint(&self, site: SiteId, input: &[u64]) -> Fingerprint {
        self.codec.encode(site, input)
    }

    pub fn cache(&self) -> &PostStateCache {
        &self.cache
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    pub fn metrics(&self) -> MemoMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn run<F, E>(&self, handler: F, input: &[u64]) -> Result<PostState, DispatchError<E>>
    where
        F: FnOnce(&[u64]) -> Result<PostState, E>,
    {
        handler(input).map_err(|err| {
            self.metrics.record_handler_failure();
            DispatchError::Handler(err)
        })
    }

    fn record(
        &self,
        site: &CallSite,
        fingerprint: Fingerprint,
        input: &[u64],
        post_state: &PostState,
    ) {
        if !site.is_memoizable() {
            return;
        }

        let outcome = self
            .cache
            .insert(site.id(), fingerprint, Arc::from(input), post_state.clone());
        self.note_insert(outcome);

        // The site may have been demoted by another thread between the check and the insert.
        if !site.is_memoizable() && self.config.invalidate_on_demotion {
            self.cache.invalidate_site(site.id());
        }
    }

    pub(crate) fn record_cold(
        &self,
        site: &CallSite,
        input: &[u64],
        post_state: PostState,
        hits: u64,
    ) -> InsertOutcome {
        let fingerprint = self.codec.encode(site.id(), input);
        let outcome = self
            .cache
            .insert_cold(site.id(), fingerprint, Arc::from(input), post_state, hits);
        self.note_insert(outcome);
        outcome
    }

    fn note_insert(&self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted | InsertOutcome::Replaced => self.metrics.record_insert(false),
            InsertOutcome::Evicted { .. } => self.metrics.record_insert(true),
            InsertOutcome::Skipped => self.metrics.record_skipped_insert(),
        }
    }

    fn demote(
        &self,
        site: &CallSite,
        fingerprint: Fingerprint,
        cached: PostState,
        observed: &PostState,
    ) {
        // Only the thread that flips the status reports and invalidates.
        if !site.demote() {
            return;
        }

        self.metrics.record_purity_violation();
        let violation = PurityViolation {
            site: site.id(),
            fingerprint,
            cached,
            observed: observed.clone(),
        };

        let dropped = if self.config.invalidate_on_demotion {
            self.cache.invalidate_site(site.id())
        } else {
            0
        };
        warn!(site = %site.id(), dropped, "{violation}; call site will no longer be memoized");

        if let Some(hook) = &self.violation_hook {
            hook(&violation);
        }
    }
}

impl fmt::Debug for MemoEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoEngine")
            .field("config", &self.config)
            .field("sites", &self.sites.read().len())
            .field("cache", &self.cache)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}
