//! Integration tests for window composition and ranking across a registry.

use std::cmp::Ordering;

use tally::{DefaultWindow, Registry, RegistryConfig, Usage, Window, WindowExt, WindowFn};

fn populated() -> Registry<String> {
    let registry = Registry::new(RegistryConfig::default()).unwrap();
    registry.increment("a".to_string(), 10).unwrap();
    registry.increment("b".to_string(), 50).unwrap();
    registry.increment("c".to_string(), 5).unwrap();
    registry
}

fn keys(counters: &[std::sync::Arc<tally::Counter<String>>]) -> Vec<&str> {
    counters.iter().map(|c| c.key().as_str()).collect()
}

#[test]
fn test_ranking_by_last_minute() {
    let registry = populated();

    let top = registry.highest(&DefaultWindow::LastMinute, 2);
    assert_eq!(keys(&top), ["b", "a"]);

    let bottom = registry.lowest(&DefaultWindow::LastMinute, 2);
    assert_eq!(keys(&bottom), ["c", "a"]);

    assert_eq!(registry.total(&DefaultWindow::LastMinute), 65);
}

#[test]
fn test_n_larger_than_registry() {
    let registry = populated();

    assert_eq!(registry.highest(&DefaultWindow::Total, 100).len(), 3);
    assert!(registry.lowest(&DefaultWindow::Total, 0).is_empty());
}

#[test]
fn test_ranking_changes_after_roll() {
    let registry = populated();
    registry.roll_seconds();
    registry.increment("c".to_string(), 1).unwrap();

    let top = registry.highest(&DefaultWindow::LastSecond, 1);
    assert_eq!(keys(&top), ["c"]);

    // Longer windows still see the earlier traffic
    let top = registry.highest(&DefaultWindow::LastMinute, 1);
    assert_eq!(keys(&top), ["b"]);
}

#[test]
fn test_every_builtin_window_on_cold_registry() {
    let registry = populated();

    for window in DefaultWindow::ALL {
        let total = registry.total(&window);
        assert_eq!(total, 65, "{window} should see only in-progress traffic");
    }
}

#[test]
fn test_windows_are_nested_after_history_fills() {
    let registry = Registry::new(RegistryConfig::default()).unwrap();

    for minute in 0..180 {
        registry.increment("k".to_string(), 1 + minute % 7).unwrap();
        registry.roll_seconds();
        registry.roll_minutes();
        if minute % 60 == 59 {
            registry.roll_hours();
        }
    }
    registry.increment("k".to_string(), 3).unwrap();

    let k = registry.get("k").unwrap();
    let amounts: Vec<_> = [
        DefaultWindow::LastSecond,
        DefaultWindow::LastMinute,
        DefaultWindow::Last5Minutes,
        DefaultWindow::Last15Minutes,
        DefaultWindow::Last30Minutes,
    ]
    .iter()
    .map(|w| w.amount(&k))
    .collect();

    assert!(amounts.windows(2).all(|pair| pair[0] <= pair[1]), "{amounts:?}");

    let hours: Vec<_> = [
        DefaultWindow::LastHour,
        DefaultWindow::Last2Hours,
        DefaultWindow::Last6Hours,
        DefaultWindow::Last12Hours,
        DefaultWindow::LastDay,
        DefaultWindow::Total,
    ]
    .iter()
    .map(|w| w.amount(&k))
    .collect();

    assert!(hours.windows(2).all(|pair| pair[0] <= pair[1]), "{hours:?}");
}

#[test]
fn test_custom_window_ranks_like_builtins() {
    let registry = populated();
    registry.roll_minutes();
    registry.increment("c".to_string(), 100).unwrap();

    // Completed minutes only, ignoring the one in progress
    let finished = WindowFn::new("finished-minutes", |usage: &Usage| {
        usage.hour_buffer().sum_last(usage.hour_buffer().capacity())
    });

    let top = registry.highest(&finished, 1);
    assert_eq!(keys(&top), ["b"]);
    assert_eq!(finished.name(), "finished-minutes");

    let a = registry.get("a").unwrap();
    let c = registry.get("c").unwrap();
    assert_eq!(finished.compare(&*a, &*c), Ordering::Greater);
    assert_eq!(DefaultWindow::LastMinute.compare(&*a, &*c), Ordering::Less);
}

#[test]
fn test_parsing_window_names() {
    for window in DefaultWindow::ALL {
        let parsed: DefaultWindow = window.name().parse().unwrap();
        assert_eq!(parsed, window);
    }

    let err = "last-week".parse::<DefaultWindow>().unwrap_err();
    assert_eq!(err.to_string(), "unknown window 'last-week'");
}
