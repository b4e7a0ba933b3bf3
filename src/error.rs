use thiserror::Error;

use crate::memo::{SiteId, Slot};

/// Caller misuse detected while registering a call site or configuring the engine.
///
/// These are reported immediately and never leave the engine in a half-registered state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("call site {site} declared an empty read set")]
    EmptyReadSet { site: SiteId },

    #[error("call site {site} declares slot {slot} more than once")]
    DuplicateSlot { site: SiteId, slot: Slot },

    #[error("call site {site} is already registered with a different read set")]
    ReadSetConflict { site: SiteId },

    #[error("max_entries_per_site must be at least 1")]
    ZeroSiteCapacity,

    #[error("max_total_entries must be at least 1")]
    ZeroTotalCapacity,

    #[error("validation sample rate {0} is outside [0, 1]")]
    SampleRate(f64),

    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: String, value: String },

    #[error("the memoization engine is already configured")]
    AlreadyConfigured,

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Failure of a single [`dispatch`](crate::memo::MemoEngine::dispatch).
///
/// Handler failures are carried unchanged in [`DispatchError::Handler`]; the engine never
/// records anything for an invocation whose handler failed.
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    #[error("call site {site} expects {expected} input values, got {found}")]
    ContextWidth {
        site: SiteId,
        expected: usize,
        found: usize,
    },

    #[error("handler failed: {0}")]
    Handler(E),
}

impl<E> DispatchError<E> {
    /// Returns the handler's own error, if that is what failed.
    pub fn into_handler_error(self) -> Option<E> {
        match self {
            Self::Handler(err) => Some(err),
            Self::ContextWidth { .. } => None,
        }
    }
}
