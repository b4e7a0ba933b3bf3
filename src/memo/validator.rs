use rand::Rng;
use thiserror::Error;

use super::{Fingerprint, PostState, SiteId};

/// A cached post-state disagreed with a fresh run of the real handler.
///
/// Never returned to the dispatch caller; it is logged and handed to the violation hook
/// when the engine demotes the site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler at call site {site} is impure: context {fingerprint} cached next_pc {:#x}, re-run produced next_pc {:#x}", .cached.next_pc, .observed.next_pc)]
pub struct PurityViolation {
    pub site: SiteId,
    pub fingerprint: Fingerprint,
    pub cached: PostState,
    pub observed: PostState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Consistent,
    Violation,
}

/// Decides which cache hits get re-checked against the real handler.
#[derive(Debug, Clone, Copy)]
pub struct PurityValidator {
    sample_rate: f64,
}

impl PurityValidator {
    /// `sample_rate` comes from a validated [`MemoConfig`](crate::MemoConfig).
    pub(crate) fn new(sample_rate: f64) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn should_sample(&self) -> bool {
        if self.sample_rate.is_nan() || self.sample_rate <= 0.0 {
            false
        } else if self.sample_rate >= 1.0 {
            true
        } else {
            rand::thread_rng().gen_bool(self.sample_rate)
        }
    }

    /// Exact structural comparison of the cached result with a fresh one.
    pub fn check(&self, cached: &PostState, fresh: &PostState) -> Verdict {
        if cached == fresh {
            Verdict::Consistent
        } else {
            Verdict::Violation
        }
    }
}
