//! End-to-end tests for the polling engine and dispatch path.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::tempdir;

use argus::audit::AuditLevel;
use argus::{AuditConfig, ChangeEvent, Config, Error, OptimizationStrategy, WatchOptions, Watcher};

fn fast_config() -> Config {
    Config {
        poll_interval: Duration::from_millis(25),
        cache_ttl: Duration::from_millis(10),
        ..Config::default()
    }
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn modify_is_detected_and_parsed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.json");
    std::fs::write(&path, r#"{"x": 1}"#).unwrap();

    let events: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let watcher = Watcher::new(fast_config()).unwrap();
    watcher
        .watch(&path, move |change| {
            sink.lock().push(change);
        })
        .unwrap();
    watcher.start().unwrap();

    std::fs::write(&path, r#"{"x": 22}"#).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || !events.lock().is_empty()),
        "no change delivered"
    );
    watcher.graceful_shutdown(Duration::from_secs(5)).unwrap();

    let events = events.lock();
    let change = &events[0];
    assert!(change.is_modify);
    assert!(!change.is_create);
    assert!(!change.is_delete);
    assert_eq!(change.path, path);

    let config = change.config.as_ref().expect("content parsed");
    assert_eq!(config.get("x"), Some(&serde_json::json!(22)));
}

#[test]
fn create_then_delete_with_watch_for_creation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("appears.json");

    let events: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let watcher = Watcher::new(fast_config()).unwrap();
    watcher
        .watch_with(
            &path,
            WatchOptions {
                watch_for_creation: true,
            },
            move |change| {
                sink.lock().push(change);
            },
        )
        .unwrap();
    watcher.start().unwrap();

    std::fs::write(&path, r#"{"k": "v"}"#).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || !events.lock().is_empty()),
        "create not delivered"
    );

    std::fs::remove_file(&path).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || events.lock().len() >= 2),
        "delete not delivered"
    );
    watcher.graceful_shutdown(Duration::from_secs(5)).unwrap();

    let events = events.lock();
    assert!(events[0].is_create, "first event is the creation");
    assert_eq!(
        events[0]
            .config
            .as_ref()
            .and_then(|c| c.get("k"))
            .and_then(|v| v.as_str()),
        Some("v")
    );

    assert!(events[1].is_delete, "second event is the deletion");
    assert!(events[1].config.is_none(), "no content for deletes");

    // No spurious events in between.
    assert_eq!(events.len(), 2, "unexpected extra events: {:?}", &events[2..]);
}

#[test]
fn slow_consumer_in_single_event_mode_drops_and_reports() {
    let dir = tempdir().unwrap();

    // More simultaneous changes than the ring can hold, against a
    // callback slow enough that the consumer cannot keep up.
    let file_count = 48;
    let mut paths = Vec::new();
    for i in 0..file_count {
        let path = dir.path().join(format!("f{i}.json"));
        std::fs::write(&path, format!(r#"{{"v": {i}}}"#)).unwrap();
        paths.push(path);
    }

    let ring_full = Arc::new(AtomicUsize::new(0));
    let full_counter = ring_full.clone();
    let audit_path = dir.path().join("audit.jsonl");

    let config = Config {
        poll_interval: Duration::from_millis(25),
        cache_ttl: Duration::from_millis(10),
        optimization_strategy: OptimizationStrategy::SingleEvent,
        boreas_capacity: 32,
        audit: AuditConfig {
            enabled: true,
            output_file: audit_path.clone(),
            min_level: AuditLevel::Warn,
            buffer_size: 1_000,
            flush_interval: Duration::from_millis(50),
            include_stack: false,
        },
        error_handler: Some(Arc::new(move |error: &Error, _path: &std::path::Path| {
            if matches!(error, Error::RingFull { .. }) {
                full_counter.fetch_add(1, Ordering::SeqCst);
            }
        })),
        ..Config::default()
    };

    let delivered = Arc::new(AtomicUsize::new(0));
    let watcher = Watcher::new(config).unwrap();
    for path in &paths {
        let counter = delivered.clone();
        watcher
            .watch(path, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
            })
            .unwrap();
    }
    watcher.start().unwrap();

    for (i, path) in paths.iter().enumerate() {
        std::fs::write(path, format!(r#"{{"v": {}}}"#, i + 1_000)).unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            ring_full.load(Ordering::SeqCst) > 0
        }),
        "expected at least one RingFull drop"
    );

    // The consumer keeps making progress and shutdown completes: no
    // deadlock.
    watcher.graceful_shutdown(Duration::from_secs(30)).unwrap();

    let delivered = delivered.load(Ordering::SeqCst);
    let dropped = ring_full.load(Ordering::SeqCst);
    assert!(delivered >= 1);
    assert!(
        delivered + dropped >= file_count,
        "every emitted change was either delivered or reported dropped"
    );
    assert!(delivered < file_count, "some events must have been dropped");

    let stats = watcher.ring_stats();
    assert_eq!(stats.len, 0, "ring drained at shutdown");
    assert!(stats.dropped as usize >= dropped);

    // Drops reach the audit trail too, not just the error handler.
    watcher.audit().flush().unwrap();
    let audit_content = std::fs::read_to_string(&audit_path).unwrap();
    assert!(
        audit_content.contains("\"event\":\"ring_full\""),
        "ring drops must be audited"
    );
}

#[test]
fn unwatch_stops_delivery() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.json");
    std::fs::write(&path, "{}").unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();

    let watcher = Watcher::new(fast_config()).unwrap();
    watcher
        .watch(&path, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    watcher.start().unwrap();

    watcher.unwatch(&path).unwrap();
    assert_eq!(watcher.watched_count(), 0);

    std::fs::write(&path, r#"{"changed": true}"#).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    watcher.graceful_shutdown(Duration::from_secs(5)).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0, "no delivery after unwatch");
}

#[test]
fn callback_panic_is_recovered() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.json");
    std::fs::write(&path, r#"{"x": 1}"#).unwrap();

    let panics = Arc::new(AtomicUsize::new(0));
    let panic_counter = panics.clone();

    let config = Config {
        error_handler: Some(Arc::new(move |error: &Error, _: &std::path::Path| {
            if matches!(error, Error::CallbackPanic { .. }) {
                panic_counter.fetch_add(1, Ordering::SeqCst);
            }
        })),
        ..fast_config()
    };

    let watcher = Watcher::new(config).unwrap();
    watcher
        .watch(&path, |_| panic!("subscriber bug"))
        .unwrap();
    watcher.start().unwrap();

    std::fs::write(&path, r#"{"x": 2}"#).unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            panics.load(Ordering::SeqCst) > 0
        }),
        "panic not routed to the error handler"
    );

    // The consumer survived the panic; another change still flows.
    std::fs::write(&path, r#"{"x": 3333}"#).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        panics.load(Ordering::SeqCst) >= 2
    }));

    watcher.graceful_shutdown(Duration::from_secs(5)).unwrap();
}
