//! Bounded TTL cache of filesystem stat snapshots.
//!
//! The polling loop is the cache's only writer; within a window shorter
//! than the configured TTL it performs at most one `stat` per path, and a
//! fresh cache entry short-circuits the syscall entirely.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// The `(mtime, size, exists)` triple captured from the filesystem.
///
/// Two snapshots are equal iff all three fields match. Immutable once
/// captured.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StatSnapshot {
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    /// File size in bytes.
    pub size: i64,
    /// Whether the path existed at capture time.
    pub exists: bool,
}

impl StatSnapshot {
    /// Snapshot for a path that does not exist.
    #[must_use]
    pub const fn missing() -> Self {
        Self {
            mtime_ns: 0,
            size: 0,
            exists: false,
        }
    }

    /// Captures a snapshot from stat metadata.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX));

        Self {
            mtime_ns,
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            exists: true,
        }
    }

    /// Modification time as a [`SystemTime`].
    #[must_use]
    pub fn mtime(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(u64::try_from(self.mtime_ns).unwrap_or(0))
    }
}

struct CacheEntry {
    snapshot: StatSnapshot,
    inserted_at: Instant,
}

/// Hit/miss counters for cache introspection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a fresh entry.
    pub hits: u64,
    /// Lookups that found nothing, or only a stale entry.
    pub misses: u64,
    /// Entries evicted to stay within capacity.
    pub evictions: u64,
}

/// Bounded mapping from path to the last observed [`StatSnapshot`].
///
/// Capacity-bounded with oldest-insertion eviction; freshness is a global
/// TTL. `lookup` never performs I/O. Single-writer by design - only the
/// polling loop mutates the cache, so there is no internal locking.
pub struct StatCache {
    entries: HashMap<PathBuf, CacheEntry>,
    order: VecDeque<PathBuf>,
    capacity: usize,
    ttl: Duration,
    stats: CacheStats,
}

impl StatCache {
    /// Creates a cache bounded to `capacity` entries with a global `ttl`.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Returns the cached snapshot and whether it is still fresh.
    ///
    /// A fresh entry (`now - inserted_at < ttl`) lets the poller skip the
    /// `stat` syscall for this path.
    pub fn lookup(&mut self, path: &Path, now: Instant) -> Option<(StatSnapshot, bool)> {
        match self.entries.get(path) {
            Some(entry) => {
                let fresh = now.duration_since(entry.inserted_at) < self.ttl;
                if fresh {
                    self.stats.hits += 1;
                } else {
                    self.stats.misses += 1;
                }
                Some((entry.snapshot, fresh))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts or refreshes an entry, evicting the oldest insertion when
    /// the cache is at capacity.
    pub fn put(&mut self, path: &Path, snapshot: StatSnapshot, now: Instant) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.snapshot = snapshot;
            entry.inserted_at = now;
            return;
        }

        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.stats.evictions += 1;
            }
        }

        self.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                snapshot,
                inserted_at: now,
            },
        );
        self.order.push_back(path.to_path_buf());
    }

    /// Removes an entry outright.
    pub fn invalidate(&mut self, path: &Path) {
        if self.entries.remove(path).is_some() {
            self.order.retain(|p| p != path);
        }
    }

    /// Drops every entry whose TTL has elapsed.
    pub fn evict_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < ttl);
        let entries = &self.entries;
        self.order.retain(|p| entries.contains_key(p));
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
