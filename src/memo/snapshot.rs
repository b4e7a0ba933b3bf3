use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{InsertOutcome, MemoEngine, PostState, RegWrite, SiteId};

/// Serialised memo entries, one per recorded calling context.
///
/// This is the interchange format a tracer emits and a later run warm-starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoSnapshot {
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub site: SiteId,
    /// Fingerprint under the exporting build's codec. Informational only: loading always
    /// recomputes it from `inputs`.
    pub ctx_hash: u64,
    pub inputs: Vec<u64>,
    pub writes: Vec<RegWrite>,
    pub next_pc: u64,
    #[serde(default)]
    pub hits: u64,
}

impl SnapshotEntry {
    pub fn post_state(&self) -> PostState {
        PostState {
            writes: self.writes.clone(),
            next_pc: self.next_pc,
        }
    }
}

impl MemoSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create snapshot {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .context("failed to serialise memo snapshot")
    }

    pub fn read_from_json(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open snapshot {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file)).context("failed to deserialise memo snapshot")
    }
}

/// What [`MemoEngine::warm_start`] did with a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmStartReport {
    pub loaded: usize,
    pub skipped: usize,
}

impl MemoEngine {
    /// Collects every cached entry of the sites that are still memoizable.
    pub fn export_snapshot(&self) -> MemoSnapshot {
        let mut entries = Vec::new();
        for site in self.call_sites() {
            if !site.is_memoizable() {
                continue;
            }
            for entry in self.cache().export_site(site.id()) {
                entries.push(SnapshotEntry {
                    site: site.id(),
                    ctx_hash: entry.fingerprint.0,
                    inputs: entry.raw_input.to_vec(),
                    writes: entry.post_state.writes,
                    next_pc: entry.post_state.next_pc,
                    hits: entry.hits,
                });
            }
        }
        MemoSnapshot { entries }
    }

    /// Seeds the cache from a snapshot.
    ///
    /// Entries are only accepted for registered, memoizable sites whose read-set width
    /// matches. Loaded entries start cold and are still subject to purity sampling.
    pub fn warm_start(&self, snapshot: &MemoSnapshot) -> WarmStartReport {
        let mut report = WarmStartReport::default();
        for entry in &snapshot.entries {
            let Some(site) = self.call_site(entry.site) else {
                debug!(site = %entry.site, "snapshot entry for unregistered call site");
                report.skipped += 1;
                continue;
            };
            if !site.is_memoizable() || entry.inputs.len() != site.read_set().len() {
                warn!(site = %entry.site, width = entry.inputs.len(), "snapshot entry does not fit call site");
                report.skipped += 1;
                continue;
            }

            match self.record_cold(&site, &entry.inputs, entry.post_state(), entry.hits) {
                InsertOutcome::Skipped => report.skipped += 1,
                _ => report.loaded += 1,
            }
        }
        debug!(loaded = report.loaded, skipped = report.skipped, "warm start finished");
        report
    }
}
