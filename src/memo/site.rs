use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Identity of a static dispatch point: a handler-table index or an instruction address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub u64);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for SiteId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Index of a register or flag in the interpreter's state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(pub u16);

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The registers and flags a handler reads, in the order the caller supplies their values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReadSet(Box<[Slot]>);

impl ReadSet {
    /// Validates a declared read set for `site`.
    ///
    /// Empty sets and repeated slots are rejected: both mean the declaration does not
    /// describe what the handler actually reads.
    pub fn declare(
        site: SiteId,
        slots: impl IntoIterator<Item = Slot>,
    ) -> Result<Self, ConfigurationError> {
        let slots: Vec<Slot> = slots.into_iter().collect();
        if slots.is_empty() {
            return Err(ConfigurationError::EmptyReadSet { site });
        }

        let mut seen = AHashSet::with_capacity(slots.len());
        for slot in &slots {
            if !seen.insert(*slot) {
                return Err(ConfigurationError::DuplicateSlot { site, slot: *slot });
            }
        }

        Ok(Self(slots.into_boxed_slice()))
    }

    pub fn slots(&self) -> &[Slot] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pulls the declared slots out of a flat state file indexed by slot number.
    ///
    /// Returns `None` if any slot lies outside `state`.
    pub fn gather(&self, state: &[u64]) -> Option<Vec<u64>> {
        self.0
            .iter()
            .map(|slot| state.get(usize::from(slot.0)).copied())
            .collect()
    }
}

/// Whether a call site may still be served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSiteStatus {
    Memoizable,
    /// Terminal: a purity check failed for this site.
    Unsafe,
}

const MEMOIZABLE: u8 = 0;
const UNSAFE: u8 = 1;

#[derive(Debug)]
struct SiteInner {
    id: SiteId,
    read_set: ReadSet,
    status: AtomicU8,
}

/// Handle to a registered call site.
///
/// Cloning is cheap; all clones observe the same status.
#[derive(Debug, Clone)]
pub struct CallSite(Arc<SiteInner>);

impl CallSite {
    pub(crate) fn new(id: SiteId, read_set: ReadSet) -> Self {
        Self(Arc::new(SiteInner {
            id,
            read_set,
            status: AtomicU8::new(MEMOIZABLE),
        }))
    }

    pub fn id(&self) -> SiteId {
        self.0.id
    }

    pub fn read_set(&self) -> &ReadSet {
        &self.0.read_set
    }

    pub fn status(&self) -> CallSiteStatus {
        match self.0.status.load(Ordering::Acquire) {
            MEMOIZABLE => CallSiteStatus::Memoizable,
            _ => CallSiteStatus::Unsafe,
        }
    }

    pub fn is_memoizable(&self) -> bool {
        self.status() == CallSiteStatus::Memoizable
    }

    /// Marks the site unsafe for the rest of the process.
    ///
    /// Returns `true` only for the caller that performed the transition, so follow-up work
    /// (invalidation, reporting) happens exactly once.
    pub(crate) fn demote(&self) -> bool {
        self.0
            .status
            .compare_exchange(MEMOIZABLE, UNSAFE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
