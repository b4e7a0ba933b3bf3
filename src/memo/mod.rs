//! Memoization of indirect handler calls.
//!
//! A [`MemoEngine`] maps a calling context (call site plus the handler's declared inputs)
//! to the post-state the handler produced for it, replays that post-state on later calls,
//! and keeps re-checking a sample of replays against the real handler. A site whose
//! handler turns out to be impure is demoted and bypasses the cache from then on.
//!
//! Besides owned engines, this module exposes one process-wide engine through
//! [`configure`], [`register_call_site`] and [`dispatch`].

pub mod cache;
pub mod engine;
pub mod fingerprint;
pub mod metrics;
pub mod site;
pub mod snapshot;
pub mod state;
pub mod validator;

pub use cache::{CacheHit, CacheLimits, CacheStats, InsertOutcome, PostStateCache};
pub use engine::{MemoEngine, ViolationHook};
pub use fingerprint::{ContextCodec, Fingerprint, HashCodec};
pub use metrics::{MemoMetrics, MemoMetricsSnapshot};
pub use site::{CallSite, CallSiteStatus, ReadSet, SiteId, Slot};
pub use snapshot::{MemoSnapshot, SnapshotEntry, WarmStartReport};
pub use state::{PostState, RegWrite};
pub use validator::{PurityValidator, PurityViolation, Verdict};

use once_cell::sync::OnceCell;

use crate::config::MemoConfig;
use crate::error::{ConfigurationError, DispatchError};

static ENGINE: OnceCell<MemoEngine> = OnceCell::new();

/// Builds the process-wide engine with `config`.
///
/// Fails with [`ConfigurationError::AlreadyConfigured`] once the engine exists, whether
/// an earlier `configure` created it or first use did with the defaults.
pub fn configure(config: MemoConfig) -> Result<(), ConfigurationError> {
    config.validate()?;
    ENGINE
        .set(MemoEngine::from_checked(config))
        .map_err(|_| ConfigurationError::AlreadyConfigured)
}

/// The process-wide engine, created with the default settings on first use unless
/// [`configure`] ran before.
pub fn engine() -> &'static MemoEngine {
    ENGINE.get_or_init(|| MemoEngine::from_checked(MemoConfig::default()))
}

pub fn register_call_site(
    id: impl Into<SiteId>,
    read_set: impl IntoIterator<Item = Slot>,
) -> Result<CallSite, ConfigurationError> {
    engine().register_call_site(id, read_set)
}

pub fn dispatch<F, E>(
    site: &CallSite,
    input: &[u64],
    handler: F,
) -> Result<PostState, DispatchError<E>>
where
    F: FnOnce(&[u64]) -> Result<PostState, E>,
{
    engine().dispatch(site, input, handler)
}
