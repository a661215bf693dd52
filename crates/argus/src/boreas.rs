//! BoreasLite - the bounded event dispatch ring.
//!
//! A multi-producer, single-consumer ring of fixed-size
//! [`FileChangeEvent`] slots. All coordination is done with atomic
//! sequence numbers under acquire/release ordering; there is no mutex on
//! the hot path and no allocation per event.
//!
//! # Protocol
//!
//! Every slot carries its own sequence number, initialized to the slot
//! index:
//!
//! - a producer may claim position `pos` when `slot[pos & mask].sequence
//!   == pos`; it claims by CAS-advancing the shared writer sequence,
//!   fills the payload, and publishes with `sequence = pos + 1`
//!   (release);
//! - the consumer reads position `pos` when `sequence == pos + 1`
//!   (acquire) and recycles the slot with `sequence = pos + capacity`.
//!
//! `writer_seq - reader_seq <= capacity` holds at all times. A producer
//! that cannot claim a slot within its spin budget drops the event and
//! reports it, so the lowest-latency mode never blocks indefinitely.
//!
//! # Ordering
//!
//! Events from one producer drain in program order; across producers the
//! order is writer-sequence acquisition order. The polling loop is the
//! only producer per path, so events for the same path are totally
//! ordered.

use std::cell::UnsafeCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

/// Width of the fixed path field in a ring slot.
///
/// A tuning constant: longer paths are tail-truncated and reported, and
/// implementations expecting long paths may raise it, keeping the slot
/// fixed-size.
pub const RING_PATH_CAP: usize = 110;

/// Event flag: the path appeared.
pub const FLAG_CREATE: u8 = 0b001;
/// Event flag: the path disappeared.
pub const FLAG_DELETE: u8 = 0b010;
/// Event flag: mtime and/or size changed.
pub const FLAG_MODIFY: u8 = 0b100;

/// Fixed-size, cache-line-friendly change record carried by the ring.
#[derive(Clone, Copy)]
pub struct FileChangeEvent {
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    /// File size in bytes.
    pub size: i64,
    /// Bitset of `FLAG_CREATE` / `FLAG_DELETE` / `FLAG_MODIFY`.
    pub flags: u8,
    /// Live byte count of `path`.
    pub path_len: u16,
    /// UTF-8 path bytes, tail-truncated to [`RING_PATH_CAP`].
    pub path: [u8; RING_PATH_CAP],
}

impl FileChangeEvent {
    /// Empty event used to initialize slots.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            mtime_ns: 0,
            size: 0,
            flags: 0,
            path_len: 0,
            path: [0; RING_PATH_CAP],
        }
    }

    /// Builds an event for `path`, returning whether the path had to be
    /// tail-truncated to fit the slot.
    #[must_use]
    pub fn new(path: &Path, mtime_ns: i64, size: i64, flags: u8) -> (Self, bool) {
        let bytes = path.as_os_str().as_encoded_bytes();
        let truncated = bytes.len() > RING_PATH_CAP;
        let len = bytes.len().min(RING_PATH_CAP);

        let mut buf = [0u8; RING_PATH_CAP];
        buf[..len].copy_from_slice(&bytes[..len]);

        (
            Self {
                mtime_ns,
                size,
                flags,
                path_len: len as u16,
                path: buf,
            },
            truncated,
        )
    }

    /// Reconstructs the path from the slot bytes.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        let len = usize::from(self.path_len).min(RING_PATH_CAP);
        PathBuf::from(String::from_utf8_lossy(&self.path[..len]).into_owned())
    }

    /// Whether the create flag is set.
    #[must_use]
    pub const fn is_create(&self) -> bool {
        self.flags & FLAG_CREATE != 0
    }

    /// Whether the delete flag is set.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        self.flags & FLAG_DELETE != 0
    }

    /// Whether the modify flag is set.
    #[must_use]
    pub const fn is_modify(&self) -> bool {
        self.flags & FLAG_MODIFY != 0
    }
}

impl Default for FileChangeEvent {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for FileChangeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChangeEvent")
            .field("path", &self.path())
            .field("mtime_ns", &self.mtime_ns)
            .field("size", &self.size)
            .field("flags", &format_args!("{:#05b}", self.flags))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run modes
// ─────────────────────────────────────────────────────────────────────────────

/// Active run policy of the ring consumer.
///
/// The `Auto` optimization strategy resolves to one of these and may
/// switch between them at runtime based on load.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunMode {
    /// Batch of 1, minimal sleep. Lowest latency for 1-2 watched files.
    SingleEvent,
    /// Batches up to 16, adaptive sleep. Balanced for 3-20 files.
    SmallBatch,
    /// Batches up to 64, longer sleep. Throughput for 20+ files.
    LargeBatch,
}

impl RunMode {
    /// Maximum events drained per consumer wake.
    #[must_use]
    pub const fn batch_size(self) -> usize {
        match self {
            RunMode::SingleEvent => 1,
            RunMode::SmallBatch => 16,
            RunMode::LargeBatch => 64,
        }
    }

    /// Ring capacity used when the config does not pin one.
    #[must_use]
    pub const fn default_capacity(self) -> usize {
        match self {
            RunMode::SingleEvent => 64,
            RunMode::SmallBatch => 128,
            RunMode::LargeBatch => 256,
        }
    }

    /// Producer spin budget before a write is dropped.
    ///
    /// Short in the lowest-latency mode so producers never stall; batch
    /// modes spin longer and apply natural backpressure instead.
    #[must_use]
    pub(crate) const fn spin_budget(self) -> u32 {
        match self {
            RunMode::SingleEvent => 256,
            RunMode::SmallBatch => 4_096,
            RunMode::LargeBatch => 16_384,
        }
    }

    /// Consumer sleep after a drain of `last_drain` events.
    ///
    /// Emptier drains sleep longer; a full batch means the ring is under
    /// pressure and the consumer should come straight back.
    #[must_use]
    pub fn idle_sleep(self, last_drain: usize) -> Duration {
        match self {
            RunMode::SingleEvent => {
                if last_drain == 0 {
                    Duration::from_micros(50)
                } else {
                    Duration::ZERO
                }
            }
            RunMode::SmallBatch => adaptive_sleep(last_drain, 16, 50, 500),
            RunMode::LargeBatch => adaptive_sleep(last_drain, 64, 500, 5_000),
        }
    }

    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            RunMode::SingleEvent => 0,
            RunMode::SmallBatch => 1,
            RunMode::LargeBatch => 2,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            0 => RunMode::SingleEvent,
            1 => RunMode::SmallBatch,
            _ => RunMode::LargeBatch,
        }
    }
}

/// Linear interpolation between `max_us` (empty drain) and `min_us`
/// (full batch).
fn adaptive_sleep(last_drain: usize, batch: usize, min_us: u64, max_us: u64) -> Duration {
    let fill = last_drain.min(batch) as u64;
    let span = max_us - min_us;
    let sleep_us = max_us - (span * fill) / batch as u64;
    Duration::from_micros(sleep_us)
}

// ─────────────────────────────────────────────────────────────────────────────
// Ring
// ─────────────────────────────────────────────────────────────────────────────

struct Slot {
    sequence: AtomicU64,
    event: UnsafeCell<FileChangeEvent>,
}

/// Counter snapshot for ring introspection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Events successfully published.
    pub written: u64,
    /// Events dropped on a full ring.
    pub dropped: u64,
    /// Events consumed.
    pub drained: u64,
    /// Events currently in flight.
    pub len: u64,
    /// Ring capacity.
    pub capacity: u64,
}

/// Bounded power-of-two MPSC ring of [`FileChangeEvent`]s.
pub struct BoreasLite {
    slots: Box<[Slot]>,
    mask: u64,
    capacity: u64,
    writer_seq: AtomicU64,
    reader_seq: AtomicU64,
    mode: AtomicU8,
    written: AtomicU64,
    dropped: AtomicU64,
    drained: AtomicU64,
}

// Slot payloads are only touched between a successful claim and the
// matching publish (unique producer) or after an acquire of the published
// sequence (unique consumer), so sharing the UnsafeCells is sound.
unsafe impl Send for BoreasLite {}
unsafe impl Sync for BoreasLite {}

impl BoreasLite {
    /// Creates a ring with the given power-of-two capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a power of two. Validation
    /// rejects such configs before a ring is ever constructed.
    #[must_use]
    pub fn new(capacity: usize, mode: RunMode) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity > 0,
            "ring capacity must be a power of two"
        );

        let slots = (0..capacity as u64)
            .map(|i| Slot {
                sequence: AtomicU64::new(i),
                event: UnsafeCell::new(FileChangeEvent::empty()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
            writer_seq: AtomicU64::new(0),
            reader_seq: AtomicU64::new(0),
            mode: AtomicU8::new(mode.as_u8()),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            drained: AtomicU64::new(0),
        }
    }

    /// Publishes an event; returns `false` when the ring stayed full for
    /// the whole spin budget and the event was dropped.
    pub fn push(&self, event: &FileChangeEvent) -> bool {
        let budget = self.mode().spin_budget();
        let mut spins: u32 = 0;

        loop {
            let pos = self.writer_seq.load(Ordering::Relaxed);
            let slot = &self.slots[(pos & self.mask) as usize];
            let seq = slot.sequence.load(Ordering::Acquire);

            if seq == pos {
                // Slot is free at this position; claim it.
                if self
                    .writer_seq
                    .compare_exchange_weak(pos, pos + 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    unsafe {
                        *slot.event.get() = *event;
                    }
                    slot.sequence.store(pos + 1, Ordering::Release);
                    self.written.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                // Lost the claim race; retry at the new position.
            } else if seq < pos {
                // The consumer has not recycled this slot: ring is full.
                spins += 1;
                if spins >= budget {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
                if spins % 64 == 0 {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
            // seq > pos: another producer advanced past us; reload.
        }
    }

    /// Consumes the next event, if one is published.
    ///
    /// Must only be called from the single consumer.
    pub fn pop(&self) -> Option<FileChangeEvent> {
        let pos = self.reader_seq.load(Ordering::Relaxed);
        let slot = &self.slots[(pos & self.mask) as usize];
        let seq = slot.sequence.load(Ordering::Acquire);

        if seq == pos + 1 {
            let event = unsafe { *slot.event.get() };
            slot.sequence.store(pos + self.capacity, Ordering::Release);
            self.reader_seq.store(pos + 1, Ordering::Release);
            self.drained.fetch_add(1, Ordering::Relaxed);
            Some(event)
        } else {
            None
        }
    }

    /// Drains up to the active mode's batch size into `out`, returning
    /// the number of events read.
    pub fn drain_batch(&self, out: &mut Vec<FileChangeEvent>) -> usize {
        let batch = self.mode().batch_size();
        let mut count = 0;
        while count < batch {
            match self.pop() {
                Some(event) => {
                    out.push(event);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Events currently in flight (claims in progress count as in
    /// flight).
    #[must_use]
    pub fn len(&self) -> u64 {
        let writer = self.writer_seq.load(Ordering::Acquire);
        let reader = self.reader_seq.load(Ordering::Acquire);
        writer.saturating_sub(reader)
    }

    /// Returns `true` when no event is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring capacity.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Active run mode.
    #[must_use]
    pub fn mode(&self) -> RunMode {
        RunMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    /// Switches the run mode; used by the Auto controller.
    pub fn set_mode(&self, mode: RunMode) {
        self.mode.store(mode.as_u8(), Ordering::Relaxed);
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> RingStats {
        RingStats {
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
        }
    }
}

impl std::fmt::Debug for BoreasLite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoreasLite")
            .field("capacity", &self.capacity)
            .field("mode", &self.mode())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn event_for(path: &str, seq: i64) -> FileChangeEvent {
        FileChangeEvent::new(Path::new(path), seq, seq, FLAG_MODIFY).0
    }

    #[test]
    fn test_event_roundtrip_and_flags() {
        let (event, truncated) = FileChangeEvent::new(Path::new("/tmp/app.json"), 7, 42, FLAG_CREATE);
        assert!(!truncated);
        assert_eq!(event.path(), PathBuf::from("/tmp/app.json"));
        assert_eq!(event.mtime_ns, 7);
        assert_eq!(event.size, 42);
        assert!(event.is_create());
        assert!(!event.is_delete());
        assert!(!event.is_modify());
    }

    #[test]
    fn test_long_path_tail_truncated() {
        let long = format!("/tmp/{}", "x".repeat(200));
        let (event, truncated) = FileChangeEvent::new(Path::new(&long), 0, 0, FLAG_MODIFY);
        assert!(truncated);
        assert_eq!(usize::from(event.path_len), RING_PATH_CAP);
        assert_eq!(
            event.path().as_os_str().len(),
            RING_PATH_CAP,
            "tail truncation keeps the leading bytes"
        );
    }

    #[test]
    fn test_push_pop_fifo() {
        let ring = BoreasLite::new(8, RunMode::SmallBatch);
        for i in 0..5 {
            assert!(ring.push(&event_for("/tmp/a", i)));
        }
        for i in 0..5 {
            let event = ring.pop().expect("event published");
            assert_eq!(event.mtime_ns, i);
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn test_full_ring_drops_and_counts() {
        let ring = BoreasLite::new(32, RunMode::SingleEvent);
        let mut accepted = 0;
        for i in 0..100 {
            if ring.push(&event_for("/tmp/a", i)) {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 32, "no consumer ran, so exactly capacity fits");
        let stats = ring.stats();
        assert_eq!(stats.written, 32);
        assert_eq!(stats.dropped, 68);

        // Delivered events are a strict prefix of the emitted sequence.
        let mut drained = Vec::new();
        while let Some(event) = ring.pop() {
            drained.push(event.mtime_ns);
        }
        assert_eq!(drained, (0..32).collect::<Vec<_>>());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_capacity_invariant_under_load() {
        let ring = Arc::new(BoreasLite::new(16, RunMode::SmallBatch));
        let producer_ring = ring.clone();

        let producer = thread::spawn(move || {
            for i in 0..10_000 {
                let _ = producer_ring.push(&event_for("/tmp/a", i));
            }
        });

        let mut drained = 0u64;
        while !producer.is_finished() || !ring.is_empty() {
            assert!(ring.len() <= ring.capacity(), "writer ran ahead of capacity");
            if ring.pop().is_some() {
                drained += 1;
            }
        }
        producer.join().unwrap();

        let stats = ring.stats();
        assert_eq!(stats.written, drained);
        assert_eq!(stats.written + stats.dropped, 10_000);
    }

    #[test]
    fn test_per_producer_order_across_threads() {
        let ring = Arc::new(BoreasLite::new(64, RunMode::LargeBatch));
        let mut handles = Vec::new();

        for producer in 0..4i64 {
            let ring = ring.clone();
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    // Encode (producer, i) so the consumer can check
                    // per-producer monotonicity.
                    while !ring.push(&event_for("/tmp/a", producer * 1_000_000 + i)) {
                        thread::yield_now();
                    }
                }
            }));
        }

        let mut last_seen = [-1i64; 4];
        let mut total = 0;
        while total < 4 * 500 {
            if let Some(event) = ring.pop() {
                let producer = (event.mtime_ns / 1_000_000) as usize;
                let seq = event.mtime_ns % 1_000_000;
                assert!(
                    seq > last_seen[producer],
                    "producer {producer} events out of order"
                );
                last_seen[producer] = seq;
                total += 1;
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_drain_batch_respects_mode() {
        let ring = BoreasLite::new(64, RunMode::SmallBatch);
        for i in 0..40 {
            assert!(ring.push(&event_for("/tmp/a", i)));
        }

        let mut out = Vec::new();
        assert_eq!(ring.drain_batch(&mut out), 16);

        ring.set_mode(RunMode::LargeBatch);
        assert_eq!(ring.drain_batch(&mut out), 24);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_default_capacities() {
        assert_eq!(RunMode::SingleEvent.default_capacity(), 64);
        assert_eq!(RunMode::SmallBatch.default_capacity(), 128);
        assert_eq!(RunMode::LargeBatch.default_capacity(), 256);
    }

    #[test]
    fn test_idle_sleep_bounds() {
        assert_eq!(
            RunMode::SmallBatch.idle_sleep(0),
            Duration::from_micros(500)
        );
        assert_eq!(
            RunMode::SmallBatch.idle_sleep(16),
            Duration::from_micros(50)
        );
        assert_eq!(
            RunMode::LargeBatch.idle_sleep(0),
            Duration::from_micros(5_000)
        );
        assert_eq!(
            RunMode::LargeBatch.idle_sleep(64),
            Duration::from_micros(500)
        );
    }
}
