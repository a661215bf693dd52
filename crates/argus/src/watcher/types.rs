//! Core types for the watch engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;

use crate::boreas::FileChangeEvent;
use crate::parser::ConfigMap;

/// A change delivered to a subscriber callback.
///
/// Exactly one of the three kind flags is set. `config` carries the
/// parsed file content for create/modify events when parsing succeeded;
/// it is `None` for deletes and for content the parser rejected (the
/// parse failure goes to the error handler).
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// The watched path.
    pub path: PathBuf,
    /// Modification time observed by the poller.
    pub mtime: SystemTime,
    /// Size observed by the poller.
    pub size: i64,
    /// The path appeared.
    pub is_create: bool,
    /// The path's content changed.
    pub is_modify: bool,
    /// The path disappeared.
    pub is_delete: bool,
    /// Parsed configuration, when available.
    pub config: Option<ConfigMap>,
}

impl ChangeEvent {
    pub(crate) fn from_ring_event(event: &FileChangeEvent) -> Self {
        Self {
            path: event.path(),
            mtime: SystemTime::UNIX_EPOCH
                + Duration::from_nanos(u64::try_from(event.mtime_ns).unwrap_or(0)),
            size: event.size,
            is_create: event.is_create(),
            is_modify: event.is_modify(),
            is_delete: event.is_delete(),
            config: None,
        }
    }

    /// Event name used in audit records.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        if self.is_delete {
            "file_deleted"
        } else if self.is_create {
            "file_created"
        } else {
            "file_modified"
        }
    }
}

/// Per-registration options for [`Watcher::watch_with`].
///
/// [`Watcher::watch_with`]: crate::Watcher::watch_with
#[derive(Clone, Copy, Debug, Default)]
pub struct WatchOptions {
    /// Accept a path that does not exist yet; the first appearance is
    /// delivered as a create event.
    pub watch_for_creation: bool,
}

/// Subscriber callback. Runs on the consumer thread; must be fast and
/// non-blocking - hand long work off to the host.
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Cancellation token shared by the poller and the consumer.
///
/// Cancelling drops the internal sender, so any worker parked in
/// [`CancelToken::sleep`] wakes immediately instead of finishing its
/// timeout.
pub(crate) struct CancelToken {
    flag: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            flag: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    pub(crate) fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        self.tx.lock().take();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleeps for `duration`, returning `false` when cancellation cut
    /// the sleep short (or had already happened).
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        match self.rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => !self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boreas::FLAG_CREATE;
    use std::path::Path;
    use std::time::Instant;

    #[test]
    fn test_change_event_from_ring() {
        let (raw, _) = FileChangeEvent::new(Path::new("/tmp/a.json"), 1_000, 5, FLAG_CREATE);
        let event = ChangeEvent::from_ring_event(&raw);
        assert_eq!(event.path, PathBuf::from("/tmp/a.json"));
        assert_eq!(event.size, 5);
        assert!(event.is_create);
        assert!(!event.is_modify);
        assert_eq!(event.kind_name(), "file_created");
        assert!(event.config.is_none());
    }

    #[test]
    fn test_cancel_interrupts_sleep() {
        let token = Arc::new(CancelToken::new());
        let sleeper = token.clone();

        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let slept_fully = sleeper.sleep(Duration::from_secs(10));
            (slept_fully, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (slept_fully, elapsed) = handle.join().unwrap();
        assert!(!slept_fully);
        assert!(elapsed < Duration::from_secs(2), "woke long before timeout");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sleep_after_cancel_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        assert!(!token.sleep(Duration::from_secs(5)));
    }

    #[test]
    fn test_uncancelled_sleep_completes() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
    }
}
