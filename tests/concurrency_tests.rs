use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use ptrmemo::memo::{MemoEngine, PostState, Slot};
use ptrmemo::MemoConfig;

const WORKERS: usize = 8;

fn pure(input: &[u64]) -> Result<PostState, Infallible> {
    Ok(PostState::new(0x2000).with_write(10, input[0].wrapping_mul(3) ^ input[1]))
}

#[test]
fn shared_engine_stays_transparent_and_bounded() {
    let engine = MemoEngine::new(MemoConfig::new(16, 40, 0.1)).unwrap();
    let sites: Vec<_> = (0..4u64)
        .map(|id| engine.register_call_site(id, [Slot(10), Slot(11)]).unwrap())
        .collect();

    thread::scope(|scope| {
        for worker in 0..WORKERS as u64 {
            let engine = &engine;
            let sites = &sites;
            scope.spawn(move || {
                for step in 0..2_000u64 {
                    let site = &sites[((step + worker) % 4) as usize];
                    let input = [step % 11, worker % 3];
                    let post = engine.dispatch(site, &input, pure).unwrap();
                    assert_eq!(post, pure(&input).unwrap());
                    assert!(engine.cache().total_entries() <= 40);
                    assert!(engine.cache().entry_count(site.id()) <= 16);
                }
            });
        }
    });

    let metrics = engine.metrics();
    assert_eq!(metrics.lookups, WORKERS as u64 * 2_000);
    assert_eq!(metrics.purity_violations, 0);
    assert!(metrics.hits > 0);
    for site in &sites {
        assert!(site.is_memoizable());
    }
}

#[test]
fn concurrent_mismatches_demote_exactly_once() {
    let reports = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&reports);
    let engine = MemoEngine::new(MemoConfig::new(16, 64, 1.0))
        .unwrap()
        .with_violation_hook(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    let site = engine.register_call_site(0x5000u64, [Slot(10)]).unwrap();
    let drift = AtomicUsize::new(0);
    let impure = |input: &[u64]| -> Result<PostState, Infallible> {
        let n = drift.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(PostState::new(0x6000).with_write(10, input[0] + n))
    };

    // seed one entry so every worker's first call is a hit
    engine.dispatch(&site, &[1], impure).unwrap();

    let barrier = Barrier::new(WORKERS);
    thread::scope(|scope| {
        for _ in 0..WORKERS {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..50 {
                    engine.dispatch(&site, &[1], impure).unwrap();
                }
            });
        }
    });

    assert!(!site.is_memoizable());
    assert_eq!(reports.load(Ordering::SeqCst), 1);
    assert_eq!(engine.metrics().purity_violations, 1);
    assert_eq!(engine.cache().entry_count(site.id()), 0);
    assert_eq!(drift.load(Ordering::SeqCst), 1 + WORKERS * 50);
}

#[test]
fn busy_sites_do_not_block_quiet_ones() {
    let engine = MemoEngine::new(MemoConfig::new(4, 1_000, 0.0)).unwrap();
    let hot = engine.register_call_site(1u64, [Slot(10), Slot(11)]).unwrap();
    let quiet = engine.register_call_site(2u64, [Slot(10), Slot(11)]).unwrap();

    engine.dispatch(&quiet, &[7, 7], pure).unwrap();

    thread::scope(|scope| {
        for worker in 0..WORKERS as u64 {
            let engine = &engine;
            let hot = &hot;
            scope.spawn(move || {
                for step in 0..1_000u64 {
                    engine.dispatch(hot, &[step, worker], pure).unwrap();
                }
            });
        }
        for _ in 0..1_000 {
            let post = engine.dispatch(&quiet, &[7, 7], pure).unwrap();
            assert_eq!(post, pure(&[7, 7]).unwrap());
        }
    });

    assert_eq!(engine.cache().entry_count(hot.id()), 4);
    assert_eq!(engine.cache().entry_count(quiet.id()), 1);
}
