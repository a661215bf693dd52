//! The watch engine: scheduler, polling loop, and ring consumer.

use std::io::ErrorKind;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use parking_lot::{Mutex, RwLock};

use crate::audit::{AuditLevel, AuditLogger};
use crate::boreas::{
    BoreasLite, FLAG_CREATE, FLAG_DELETE, FLAG_MODIFY, FileChangeEvent, RingStats, RunMode,
};
use crate::cache::{StatCache, StatSnapshot};
use crate::config::{Config, ErrorHandler};
use crate::error::{Error, Result};
use crate::format::ConfigFormat;
use crate::parser;
use crate::security;
use crate::watcher::types::{CancelToken, ChangeCallback, ChangeEvent, WatchOptions};

/// How often the Auto controller re-evaluates the run mode.
const AUTO_EVAL_PERIOD: Duration = Duration::from_secs(1);

struct Subscription {
    path: PathBuf,
    callback: ChangeCallback,
    last: Option<StatSnapshot>,
    index: u64,
}

struct EngineShared {
    config: Config,
    /// Registration-ordered subscriptions. Written by `watch`/`unwatch`
    /// and by the poller updating snapshots; the consumer only reads.
    subscriptions: RwLock<Vec<Subscription>>,
    ring: BoreasLite,
    audit: AuditLogger,
    error_handler: ErrorHandler,
    cancel: CancelToken,
    /// Set when a graceful shutdown deadline elapses: the consumer must
    /// stop draining and exit, dropping whatever is left in the ring.
    abandon: AtomicBool,
    next_index: AtomicU64,
}

enum Lifecycle {
    Idle,
    Running {
        poller: JoinHandle<()>,
        consumer: JoinHandle<()>,
        consumer_done: Receiver<()>,
    },
    Stopped,
}

/// The configuration watcher.
///
/// Construction validates the config and opens the audit trail but does
/// not start polling; call [`start`](Watcher::start) once subscriptions
/// are registered (registration while running is also fine).
///
/// Two long-lived workers run between `start` and `stop`: the poller
/// (sole stat caller and ring producer) and the ring consumer (sole
/// callback invoker). Runtime failures go to the error handler and
/// never terminate either loop.
pub struct Watcher {
    shared: Arc<EngineShared>,
    lifecycle: Mutex<Lifecycle>,
}

impl Watcher {
    /// Validates `config` and builds an idle watcher.
    ///
    /// # Errors
    ///
    /// The first [`Error::InvalidConfig`] violation, or audit setup
    /// failures.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let report = config.validate_detailed();
        for warning in &report.warnings {
            tracing::warn!(code = warning.code, "{}", warning.message);
        }

        let audit = AuditLogger::new(&config.audit)?;
        let ring = BoreasLite::new(
            config.effective_capacity(),
            config.optimization_strategy.initial_mode(),
        );
        let error_handler = config.resolved_error_handler();

        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                subscriptions: RwLock::new(Vec::new()),
                ring,
                audit,
                error_handler,
                cancel: CancelToken::new(),
                abandon: AtomicBool::new(false),
                next_index: AtomicU64::new(0),
            }),
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    /// Watcher with the default [`Config`].
    ///
    /// # Errors
    ///
    /// See [`Watcher::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(Config::default())
    }

    /// Registers `callback` for changes to `path`.
    ///
    /// The file must exist; use [`watch_with`](Watcher::watch_with) with
    /// `watch_for_creation` for paths that appear later. Re-registering
    /// a path replaces its callback and keeps its registration order.
    ///
    /// # Errors
    ///
    /// [`Error::Security`] for rejected paths (also audit-logged at the
    /// security level), [`Error::FileNotFound`] for missing files.
    pub fn watch<F>(&self, path: impl AsRef<Path>, callback: F) -> Result<()>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        self.watch_with(path, WatchOptions::default(), callback)
    }

    /// [`watch`](Watcher::watch) with explicit options.
    ///
    /// # Errors
    ///
    /// See [`watch`](Watcher::watch).
    pub fn watch_with<F>(
        &self,
        path: impl AsRef<Path>,
        options: WatchOptions,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let path = path.as_ref();

        if let Err(error) = security::validate_watchable_path(path) {
            self.shared.audit.log_security_event(
                "watch_rejected",
                &error.to_string(),
                None,
            );
            return Err(error);
        }

        let path = clean_path(path)?;

        let last = match std::fs::metadata(&path) {
            Ok(metadata) => Some(StatSnapshot::from_metadata(&metadata)),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                if !options.watch_for_creation {
                    return Err(Error::file_not_found(path));
                }
                Some(StatSnapshot::missing())
            }
            Err(error) => return Err(Error::io(&path, error)),
        };

        let callback: ChangeCallback = Arc::new(callback);
        {
            let mut subscriptions = self.shared.subscriptions.write();
            if let Some(existing) = subscriptions.iter_mut().find(|s| s.path == path) {
                existing.callback = callback;
                return Ok(());
            }

            if subscriptions.len() >= self.shared.config.max_watched_files {
                tracing::warn!(
                    path = %path.display(),
                    limit = self.shared.config.max_watched_files,
                    "watched-file quota exceeded; the poller only services paths inside the quota"
                );
            }

            let index = self.shared.next_index.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(path = %path.display(), index, "registered watch");
            subscriptions.push(Subscription {
                path: path.clone(),
                callback,
                last,
                index,
            });
        }

        self.shared.audit.log_file_watch("watch_start", &path);
        Ok(())
    }

    /// Removes the subscription for `path`. Unknown paths are a no-op.
    ///
    /// # Errors
    ///
    /// Only path-cleaning I/O failures.
    pub fn unwatch(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = clean_path(path.as_ref())?;

        let removed = {
            let mut subscriptions = self.shared.subscriptions.write();
            let before = subscriptions.len();
            subscriptions.retain(|s| s.path != path);
            before != subscriptions.len()
        };

        if removed {
            self.shared.audit.log_file_watch("watch_stop", &path);
        }
        Ok(())
    }

    /// Launches the poller and the ring consumer.
    ///
    /// May only be called once per instance.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] on any call after the first.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(Error::AlreadyStarted);
        }

        let (done_tx, done_rx) = bounded(1);

        let poller_shared = self.shared.clone();
        let poller = std::thread::Builder::new()
            .name("argus-poller".to_string())
            .spawn(move || poller_loop(&poller_shared))
            .map_err(|e| Error::io("argus-poller", e))?;

        let consumer_shared = self.shared.clone();
        let consumer = std::thread::Builder::new()
            .name("argus-consumer".to_string())
            .spawn(move || {
                consumer_loop(&consumer_shared);
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::io("argus-consumer", e))?;

        *lifecycle = Lifecycle::Running {
            poller,
            consumer,
            consumer_done: done_rx,
        };

        self.shared
            .audit
            .log(AuditLevel::Info, "watcher_start", "watcher", Path::new(""), None, None, None);
        Ok(())
    }

    /// Requests shutdown. Polling stops immediately; the consumer
    /// drains already-enqueued events in the background and exits.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] when the watcher was never started or
    /// already stopped.
    pub fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running { poller, .. } => {
                self.shared.cancel.cancel();
                let _ = poller.join();
                self.shared.audit.log(
                    AuditLevel::Info,
                    "watcher_stop",
                    "watcher",
                    Path::new(""),
                    None,
                    None,
                    None,
                );
                Ok(())
            }
            other => {
                *lifecycle = other;
                Err(Error::NotRunning)
            }
        }
    }

    /// Like [`stop`](Watcher::stop), but waits up to `timeout` for the
    /// consumer to finish draining.
    ///
    /// On success the ring is empty and no callback is in progress. On
    /// timeout the remaining events are dropped and
    /// [`Error::ShutdownTimeout`] is returned.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] or [`Error::ShutdownTimeout`].
    pub fn graceful_shutdown(&self, timeout: Duration) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running {
                poller,
                consumer,
                consumer_done,
            } => {
                self.shared.cancel.cancel();
                let _ = poller.join();

                match consumer_done.recv_timeout(timeout) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        let _ = consumer.join();
                        self.shared.audit.log(
                            AuditLevel::Info,
                            "watcher_stop",
                            "watcher",
                            Path::new(""),
                            None,
                            None,
                            None,
                        );
                        let _ = self.shared.audit.flush();
                        Ok(())
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        self.shared.abandon.store(true, Ordering::Release);
                        Err(Error::ShutdownTimeout { timeout })
                    }
                }
            }
            other => {
                *lifecycle = other;
                Err(Error::NotRunning)
            }
        }
    }

    /// Whether the workers are live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running { .. })
            && !self.shared.cancel.is_cancelled()
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn watched_count(&self) -> usize {
        self.shared.subscriptions.read().len()
    }

    /// Dispatch ring counters.
    #[must_use]
    pub fn ring_stats(&self) -> RingStats {
        self.shared.ring.stats()
    }

    /// The audit trail attached to this watcher.
    #[must_use]
    pub fn audit(&self) -> &AuditLogger {
        &self.shared.audit
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        // Workers hold their own Arc to the shared state; cancelling here
        // lets them wind down even if the host never called stop.
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("running", &self.is_running())
            .field("watched", &self.watched_count())
            .field("ring", &self.shared.ring)
            .finish_non_exhaustive()
    }
}

fn clean_path(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| Error::io(path, e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Poller
// ─────────────────────────────────────────────────────────────────────────────

fn poller_loop(shared: &Arc<EngineShared>) {
    let mut cache = StatCache::new(shared.config.max_watched_files, shared.config.cache_ttl);

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let tick_start = Instant::now();
        poll_tick(shared, &mut cache);

        let work = tick_start.elapsed();
        let sleep = shared
            .config
            .poll_interval
            .saturating_sub(work)
            .max(Duration::from_millis(1));
        if !shared.cancel.sleep(sleep) {
            break;
        }
    }
}

fn poll_tick(shared: &Arc<EngineShared>, cache: &mut StatCache) {
    cache.evict_expired(Instant::now());

    // Snapshot the iteration targets so stat I/O happens without holding
    // the subscription lock. Registration-index order, bounded by the
    // quota.
    let mut targets: Vec<(u64, PathBuf, Option<StatSnapshot>)> = {
        let subscriptions = shared.subscriptions.read();
        subscriptions
            .iter()
            .take(shared.config.max_watched_files)
            .map(|s| (s.index, s.path.clone(), s.last))
            .collect()
    };
    targets.sort_by_key(|(index, _, _)| *index);

    for (_, path, previous) in targets {
        if shared.cancel.is_cancelled() {
            return;
        }
        poll_one(shared, cache, &path, previous);
    }
}

fn poll_one(
    shared: &Arc<EngineShared>,
    cache: &mut StatCache,
    path: &Path,
    previous: Option<StatSnapshot>,
) {
    let now = Instant::now();
    if let Some((_, fresh)) = cache.lookup(path, now)
        && fresh
    {
        return;
    }

    let snapshot = match std::fs::metadata(path) {
        Ok(metadata) => StatSnapshot::from_metadata(&metadata),
        Err(error) if error.kind() == ErrorKind::NotFound => StatSnapshot::missing(),
        Err(error) => {
            (shared.error_handler)(&Error::io(path, error), path);
            shared.audit.log(
                AuditLevel::Warn,
                "stat_error",
                "watcher",
                path,
                None,
                None,
                None,
            );
            return;
        }
    };
    cache.put(path, snapshot, now);

    let flags = match previous {
        None => {
            if snapshot.exists {
                FLAG_CREATE
            } else {
                0
            }
        }
        Some(previous) => {
            if previous == snapshot {
                0
            } else if previous.exists && !snapshot.exists {
                FLAG_DELETE
            } else if !previous.exists && snapshot.exists {
                FLAG_CREATE
            } else if snapshot.exists {
                FLAG_MODIFY
            } else {
                0
            }
        }
    };

    {
        let mut subscriptions = shared.subscriptions.write();
        if let Some(subscription) = subscriptions.iter_mut().find(|s| s.path == path) {
            subscription.last = Some(snapshot);
        }
    }

    if flags == 0 {
        return;
    }

    let (event, truncated) = FileChangeEvent::new(path, snapshot.mtime_ns, snapshot.size, flags);
    if truncated {
        tracing::warn!(
            path = %path.display(),
            cap = crate::boreas::RING_PATH_CAP,
            "path tail-truncated to fit the ring slot"
        );
        shared.audit.log(
            AuditLevel::Warn,
            "path_truncated",
            "watcher",
            path,
            None,
            None,
            None,
        );
    }

    if shared.ring.push(&event) {
        shared.audit.log_file_watch(flag_event_name(flags), path);
    } else {
        (shared.error_handler)(&Error::ring_full(path), path);
        shared.audit.log(
            AuditLevel::Warn,
            "ring_full",
            "watcher",
            path,
            None,
            None,
            None,
        );
    }
}

const fn flag_event_name(flags: u8) -> &'static str {
    if flags & FLAG_DELETE != 0 {
        "file_deleted"
    } else if flags & FLAG_CREATE != 0 {
        "file_created"
    } else {
        "file_modified"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Consumer
// ─────────────────────────────────────────────────────────────────────────────

fn consumer_loop(shared: &Arc<EngineShared>) {
    let adaptive = shared.config.optimization_strategy.is_adaptive();
    let mut batch: Vec<FileChangeEvent> = Vec::with_capacity(RunMode::LargeBatch.batch_size());
    let mut last_eval = Instant::now();
    let mut drained_since_eval: u64 = 0;
    let mut drains_since_eval: u64 = 0;

    loop {
        if shared.abandon.load(Ordering::Acquire) {
            break;
        }

        batch.clear();
        let drained = shared.ring.drain_batch(&mut batch);

        for event in &batch {
            if shared.abandon.load(Ordering::Acquire) {
                return;
            }
            deliver(shared, event);
        }

        if adaptive {
            drained_since_eval += drained as u64;
            drains_since_eval += 1;
            if last_eval.elapsed() >= AUTO_EVAL_PERIOD {
                evaluate_mode(shared, drained_since_eval, drains_since_eval);
                drained_since_eval = 0;
                drains_since_eval = 0;
                last_eval = Instant::now();
            }
        }

        if drained == 0 && shared.cancel.is_cancelled() && shared.ring.is_empty() {
            break;
        }

        let sleep = shared.ring.mode().idle_sleep(drained);
        if !sleep.is_zero() {
            std::thread::sleep(sleep);
        }
    }
}

/// Auto controller: pick a run mode from the watched-file count and the
/// recent drain sizes.
fn evaluate_mode(shared: &Arc<EngineShared>, drained: u64, drains: u64) {
    let watched = shared.subscriptions.read().len();
    let average_drain = if drains > 0 { drained / drains } else { 0 };

    let target = if watched <= 2 && average_drain <= 1 {
        RunMode::SingleEvent
    } else if watched <= 20 && average_drain < RunMode::SmallBatch.batch_size() as u64 {
        RunMode::SmallBatch
    } else {
        RunMode::LargeBatch
    };

    if target != shared.ring.mode() {
        tracing::debug!(mode = ?target, watched, average_drain, "switching ring mode");
        shared.ring.set_mode(target);
    }
}

fn deliver(shared: &Arc<EngineShared>, raw: &FileChangeEvent) {
    let path = raw.path();

    let callback = {
        let subscriptions = shared.subscriptions.read();
        subscriptions
            .iter()
            .find(|s| s.path == path)
            .map(|s| s.callback.clone())
    };
    let Some(callback) = callback else {
        // Unwatched between emission and drain; nothing to deliver to.
        tracing::debug!(path = %path.display(), "dropping event for unwatched path");
        return;
    };

    let mut change = ChangeEvent::from_ring_event(raw);

    if !change.is_delete {
        match std::fs::read(&path) {
            Ok(bytes) => {
                let result = match &shared.config.parser {
                    Some(parser) => parser.parse(&bytes),
                    None => parser::global().parse(&bytes, ConfigFormat::from_path(&path)),
                };
                match result {
                    Ok(map) => change.config = Some(map),
                    Err(error) => {
                        (shared.error_handler)(&error, &path);
                        shared.audit.log(
                            AuditLevel::Warn,
                            "parse_error",
                            "watcher",
                            &path,
                            None,
                            None,
                            None,
                        );
                    }
                }
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {
                // Deleted between the stat and the read; the delete event
                // follows on the next tick.
            }
            Err(error) => {
                (shared.error_handler)(&Error::io(&path, error), &path);
                shared.audit.log(
                    AuditLevel::Warn,
                    "read_error",
                    "watcher",
                    &path,
                    None,
                    None,
                    None,
                );
            }
        }
    }

    let event_name = change.kind_name();
    let delivery = catch_unwind(AssertUnwindSafe(|| callback(change)));
    match delivery {
        Ok(()) => {
            shared.audit.log(
                AuditLevel::Info,
                "change_delivered",
                "watcher",
                &path,
                None,
                Some(serde_json::Value::String(event_name.to_string())),
                None,
            );
        }
        Err(_) => {
            let error = Error::callback_panic(&path);
            (shared.error_handler)(&error, &path);
            shared.audit.log(
                AuditLevel::Warn,
                "callback_panic",
                "watcher",
                &path,
                None,
                None,
                None,
            );
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn fast_config() -> Config {
        Config {
            poll_interval: Duration::from_millis(25),
            cache_ttl: Duration::from_millis(10),
            ..Config::default()
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = Config {
            poll_interval: Duration::ZERO,
            cache_ttl: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(
            Watcher::new(config),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_watch_missing_file_without_flag() {
        let watcher = Watcher::new(fast_config()).unwrap();
        let err = watcher.watch("/tmp/definitely-not-here.json", |_| {}).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_watch_missing_file_with_flag() {
        let watcher = Watcher::new(fast_config()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("later.json");

        watcher
            .watch_with(
                &path,
                WatchOptions {
                    watch_for_creation: true,
                },
                |_| {},
            )
            .unwrap();
        assert_eq!(watcher.watched_count(), 1);
    }

    #[test]
    fn test_watch_rejects_insecure_path() {
        let watcher = Watcher::new(fast_config()).unwrap();
        let err = watcher.watch("../../escape.json", |_| {}).unwrap_err();
        assert!(matches!(err, Error::Security { .. }));
    }

    #[test]
    fn test_idempotent_watch_replaces_callback() {
        let watcher = Watcher::new(fast_config()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(&path, "{}").unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        watcher
            .watch(&path, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let counter = second.clone();
        watcher
            .watch(&path, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(watcher.watched_count(), 1, "one subscription per path");

        // Drive the replaced callback directly through the delivery path.
        watcher.start().unwrap();
        std::fs::write(&path, "{\"v\": 2}").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while second.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        watcher.graceful_shutdown(Duration::from_secs(5)).unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0, "old callback replaced");
        assert!(second.load(Ordering::SeqCst) >= 1, "new callback invoked");
    }

    #[test]
    fn test_unwatch_unknown_path_is_noop() {
        let watcher = Watcher::new(fast_config()).unwrap();
        assert!(watcher.unwatch("/tmp/never-watched.json").is_ok());
    }

    #[test]
    fn test_start_twice_fails() {
        let watcher = Watcher::new(fast_config()).unwrap();
        watcher.start().unwrap();
        assert!(matches!(watcher.start(), Err(Error::AlreadyStarted)));
        watcher.stop().unwrap();
        assert!(matches!(watcher.start(), Err(Error::AlreadyStarted)));
    }

    #[test]
    fn test_stop_without_start_fails() {
        let watcher = Watcher::new(fast_config()).unwrap();
        assert!(matches!(watcher.stop(), Err(Error::NotRunning)));
    }

    #[test]
    fn test_graceful_shutdown_leaves_empty_ring() {
        let watcher = Watcher::new(fast_config()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.json");
        std::fs::write(&path, "{\"x\": 1}").unwrap();

        watcher.watch(&path, |_| {}).unwrap();
        watcher.start().unwrap();
        std::fs::write(&path, "{\"x\": 22}").unwrap();
        std::thread::sleep(Duration::from_millis(120));

        watcher.graceful_shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(watcher.ring_stats().len, 0);
        assert!(!watcher.is_running());
    }
}
