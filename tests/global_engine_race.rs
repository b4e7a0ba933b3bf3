//! Concurrent `configure` and first use of the process-wide engine; runs in its own binary.

use std::thread;

use ptrmemo::memo;
use ptrmemo::MemoConfig;

#[test]
fn successful_configure_is_the_configuration_in_use() {
    let wanted = MemoConfig::new(3, 9, 0.5);

    let accepted = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let wanted = wanted.clone();
                scope.spawn(move || {
                    if worker % 2 == 0 {
                        memo::configure(wanted).is_ok()
                    } else {
                        memo::engine();
                        false
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|accepted| *accepted)
            .count()
    });

    assert!(accepted <= 1);
    let expected = if accepted == 1 {
        wanted
    } else {
        MemoConfig::default()
    };
    assert_eq!(memo::engine().config(), &expected);
}
