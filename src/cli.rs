use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::MemoConfig;
use crate::memo::{CallSite, MemoEngine, MemoSnapshot, PostState, Slot};
use ptrmemo_utils::logger;

/// Argument register the bench handlers read and write.
const A0: u16 = 10;
const REGISTERS: usize = 32;

type Handler = fn(&[u64]) -> Result<PostState, Infallible>;

#[derive(Parser, Debug)]
#[command(
    name = "ptrcall",
    version,
    about = "Indirect-call microbench driven through the memoization engine"
)]
pub struct PtrcallCli {
    #[arg(short = 'n', long, default_value_t = 100_000)]
    /// Loop iterations per worker.
    iterations: u64,

    #[arg(short, long, default_value_t = 1)]
    /// Interpreter instances sharing one engine.
    workers: usize,

    #[arg(long)]
    /// Fraction of cache hits re-checked against the real handler.
    sample_rate: Option<f64>,

    #[arg(long)]
    /// Maximum cached contexts per call site.
    max_per_site: Option<usize>,

    #[arg(long)]
    /// Maximum cached contexts overall.
    max_total: Option<usize>,

    #[arg(long)]
    /// Add a stateful handler to the table; it must end up demoted.
    impure: bool,

    #[arg(long)]
    /// Keep a demoted site's entries instead of dropping them.
    keep_demoted: bool,

    #[arg(long)]
    /// Warm-start the cache from a JSON snapshot.
    snapshot_in: Option<PathBuf>,

    #[arg(long)]
    /// Write the cache to a JSON snapshot after the run.
    snapshot_out: Option<PathBuf>,
}

impl PtrcallCli {
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Environment settings, overridden by whatever was given on the command line.
    pub fn memo_config(&self) -> Result<MemoConfig> {
        let mut config = MemoConfig::from_env()?;
        if let Some(rate) = self.sample_rate {
            config.validation_sample_rate = rate;
        }
        if let Some(max) = self.max_per_site {
            config.max_entries_per_site = max;
        }
        if let Some(max) = self.max_total {
            config.max_total_entries = max;
        }
        if self.keep_demoted {
            config.invalidate_on_demotion = false;
        }
        config.validate()?;
        Ok(config)
    }
}

struct TableSlot {
    site: CallSite,
    handler: Handler,
}

fn add7(input: &[u64]) -> Result<PostState, Infallible> {
    let x = input[0] as u32;
    Ok(PostState::new(0x2000).with_write(A0, u64::from(x.wrapping_add(7))))
}

fn twiddle(input: &[u64]) -> Result<PostState, Infallible> {
    let x = input[0] as u32;
    Ok(PostState::new(0x4000).with_write(A0, u64::from((x ^ 0x1234) & 0xFFFF)))
}

static DRIFT: AtomicU64 = AtomicU64::new(0);

// Reads hidden state, so equal inputs do not give equal results.
fn drifting(input: &[u64]) -> Result<PostState, Infallible> {
    let drift = DRIFT.fetch_add(1, Ordering::Relaxed);
    Ok(PostState::new(0x6000).with_write(A0, input[0].wrapping_add(drift)))
}

fn build_table(engine: &MemoEngine, impure: bool) -> Result<Vec<TableSlot>> {
    let mut handlers: Vec<(u64, Handler)> = vec![(0x1000, add7), (0x3000, twiddle)];
    if impure {
        handlers.push((0x5000, drifting));
    }

    handlers
        .into_iter()
        .map(|(address, handler)| -> Result<TableSlot> {
            let site = engine.register_call_site(address, [Slot(A0)])?;
            Ok(TableSlot { site, handler })
        })
        .collect()
}

fn run_worker(engine: &MemoEngine, table: &[TableSlot], iterations: u64) -> Result<u64> {
    let mut regs = [0u64; REGISTERS];
    let mut acc = 0u64;
    for i in 0..iterations {
        let slot = &table[(i % table.len() as u64) as usize];
        regs[usize::from(A0)] = if i & 1 == 1 { 3 } else { 5 };
        let input = slot
            .site
            .read_set()
            .gather(&regs)
            .with_context(|| {
                format!("call site {} reads outside the register file", slot.site.id())
            })?;
        let post = engine.dispatch(&slot.site, &input, slot.handler)?;
        post.apply_to(&mut regs);
        acc = acc.wrapping_add(regs[usize::from(A0)]);
    }
    Ok(acc)
}

pub fn run() -> Result<()> {
    logger::init_logging();
    let cli = PtrcallCli::parse();
    let config = cli.memo_config()?;
    debug!(?config, "engine configuration");

    let engine = MemoEngine::new(config)?;
    let table = build_table(&engine, cli.impure)?;

    if let Some(path) = &cli.snapshot_in {
        let snapshot = MemoSnapshot::read_from_json(path)?;
        let report = engine.warm_start(&snapshot);
        info!(path = %path.display(), loaded = report.loaded, skipped = report.skipped, "warm start");
    }

    let started = Instant::now();
    let sums = (0..cli.workers.max(1))
        .into_par_iter()
        .map(|_| run_worker(&engine, &table, cli.iterations))
        .collect::<Result<Vec<_>>>()
        .context("bench worker failed")?;
    let elapsed = started.elapsed();

    print_summary(&engine, &table, &sums, elapsed);

    if let Some(path) = &cli.snapshot_out {
        let snapshot = engine.export_snapshot();
        snapshot.write_to_json(path)?;
        println!(
            "{} {} entries to {}",
            "snapshot".green().bold(),
            snapshot.len(),
            path.display()
        );
    }

    Ok(())
}

fn print_summary(engine: &MemoEngine, table: &[TableSlot], sums: &[u64], elapsed: Duration) {
    let metrics = engine.metrics();
    let stats = engine.cache().stats();

    println!("{} {:?}", "elapsed".bold(), elapsed);
    for (worker, acc) in sums.iter().enumerate() {
        println!("{} {worker}: acc = {acc}", "worker".bold());
    }
    println!(
        "{} {} lookups, {} hits ({:.2}%), {} misses, {} collisions",
        "cache".green().bold(),
        metrics.lookups,
        metrics.hits,
        metrics.hit_rate() * 100.0,
        metrics.misses,
        metrics.collisions
    );
    println!(
        "{} {} entries across {} sites ({:.2}% of budget), {} evictions",
        "store".green().bold(),
        stats.total_entries,
        stats.sites,
        stats.usage_percent,
        metrics.evictions
    );
    println!(
        "{} {} re-checks, {} confirmed, {} violations, {} bypassed calls",
        "purity".yellow().bold(),
        metrics.validations,
        metrics.confirmations,
        metrics.purity_violations,
        metrics.bypassed_calls
    );
    for slot in table {
        let status = if slot.site.is_memoizable() {
            "memoizable".green()
        } else {
            "unsafe".red()
        };
        println!("  site {} {}", slot.site.id(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bench_handlers_match_reference_arithmetic() {
        assert_eq!(add7(&[5]).unwrap().value_of(A0), Some(12));
        assert_eq!(twiddle(&[3]).unwrap().value_of(A0), Some(0x1237));
        assert_eq!(twiddle(&[3]).unwrap().next_pc, 0x4000);
    }

    #[test]
    fn worker_sums_are_cache_transparent() {
        let engine = MemoEngine::new(MemoConfig::new(4, 16, 1.0)).unwrap();
        let table = build_table(&engine, false).unwrap();
        let acc = run_worker(&engine, &table, 10).unwrap();

        // five calls of add7(5) and five of twiddle(3)
        assert_eq!(acc, 5 * 12 + 5 * 0x1237);
        assert_eq!(engine.metrics().misses, 2);
        assert_eq!(engine.metrics().purity_violations, 0);
    }

    #[test]
    fn command_line_overrides_config() {
        let cli = PtrcallCli::parse_from([
            "ptrcall",
            "--iterations",
            "8",
            "--sample-rate",
            "1.0",
            "--max-per-site",
            "3",
            "--keep-demoted",
        ]);
        assert_eq!(cli.iterations(), 8);
        assert_eq!(cli.workers(), 1);

        let config = cli.memo_config().unwrap();
        assert_eq!(config.validation_sample_rate, 1.0);
        assert_eq!(config.max_entries_per_site, 3);
        assert!(!config.invalidate_on_demotion);
    }
}
