//! The process-wide engine can only be configured once, so everything lives in one test.

use std::convert::Infallible;

use ptrmemo::memo::{self, PostState, Slot};
use ptrmemo::{ConfigurationError, MemoConfig};

#[test]
fn global_engine_is_configured_once() {
    assert_eq!(
        memo::configure(MemoConfig::new(0, 16, 0.0)),
        Err(ConfigurationError::ZeroSiteCapacity)
    );

    memo::configure(MemoConfig::new(2, 16, 0.0)).unwrap();
    assert_eq!(
        memo::configure(MemoConfig::default()),
        Err(ConfigurationError::AlreadyConfigured)
    );

    let site = memo::register_call_site(0x1000u64, [Slot(10)]).unwrap();
    for arg in [5, 3, 1, 5] {
        let post = memo::dispatch(&site, &[arg], |input| {
            Ok::<_, Infallible>(PostState::new(0x2000).with_write(10, input[0] + 7))
        })
        .unwrap();
        assert_eq!(post.value_of(10), Some(arg + 7));
    }

    let engine = memo::engine();
    assert_eq!(engine.config().max_entries_per_site, 2);
    assert_eq!(engine.cache().entry_count(site.id()), 2);
    assert_eq!(engine.metrics().misses, 4);
}
