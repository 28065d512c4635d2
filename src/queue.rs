//! Fixed-capacity record queue between a producer and the record loop.
//!
//! `BoundedRecordQueue` is the only explicitly synchronized structure shared between
//! the transport receiver and the loop thread. All locking is internal: a
//! `parking_lot::Mutex` guards the entries and two condition variables wake blocked
//! producers and consumers.
//!
//! # Overflow
//!
//! What happens when a push finds the queue full is fixed at construction:
//!
//! - [`OverflowPolicy::DropOldest`]: the head entry is evicted and the new one
//!   appended, so the queue always holds the most recent `capacity` pushes.
//! - [`OverflowPolicy::DropNewest`]: the incoming entry is rejected.
//! - [`OverflowPolicy::Block`]: the producer waits up to a timeout for room.
//!
//! Drops only ever happen at one end, so the surviving entries keep their
//! arrival order.
//!
//! # Level notifications
//!
//! Every size change is published on a `tokio::sync::watch` channel. Status
//! displays subscribe with [`BoundedRecordQueue::subscribe_level`] instead of
//! polling the queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::trace;

use crate::record::Record;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default wait for a blocked producer.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_millis(100);

/// Behaviour of `push` on a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest entry to make room.
    #[default]
    DropOldest,
    /// Reject the incoming entry.
    DropNewest,
    /// Wait for room, up to a timeout.
    Block,
}

/// A record plus the instant it entered the queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// The queued record.
    pub record: Record,
    /// When the record was pushed.
    pub arrived: Instant,
}

impl QueueEntry {
    /// Time spent in the queue so far.
    pub fn age(&self) -> Duration {
        self.arrived.elapsed()
    }
}

/// Counters describing queue traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Entries accepted by `push`.
    pub pushed: u64,
    /// Entries handed to consumers.
    pub popped: u64,
    /// Entries evicted to make room (`DropOldest`).
    pub evicted: u64,
    /// Entries refused (`DropNewest`, `Block` timeout, or closed queue).
    pub rejected: u64,
    /// Entries discarded by `clear`.
    pub cleared: u64,
}

impl QueueStats {
    /// Everything that entered the queue but will never be popped.
    pub fn lost(&self) -> u64 {
        self.evicted + self.rejected + self.cleared
    }
}

struct State {
    entries: VecDeque<QueueEntry>,
    closed: bool,
}

/// Fixed-capacity FIFO of records.
pub struct BoundedRecordQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    overflow: OverflowPolicy,
    block_timeout: Duration,
    level: watch::Sender<usize>,
    pushed: AtomicU64,
    popped: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    cleared: AtomicU64,
}

impl std::fmt::Debug for BoundedRecordQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedRecordQueue")
            .field("capacity", &self.capacity)
            .field("overflow", &self.overflow)
            .field("len", &self.len())
            .finish()
    }
}

impl Default for BoundedRecordQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, OverflowPolicy::default())
    }
}

impl BoundedRecordQueue {
    /// Create a queue. A capacity of zero is raised to one.
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (level, _) = watch::channel(0);
        Self {
            state: Mutex::new(State {
                entries: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            overflow,
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            level,
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            cleared: AtomicU64::new(0),
        }
    }

    /// Set how long `push` waits under [`OverflowPolicy::Block`].
    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout = timeout;
        self
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured overflow policy.
    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record according to the overflow policy.
    ///
    /// Returns `false` when the record was not queued.
    pub fn push(&self, record: Record) -> bool {
        self.push_timeout(record, self.block_timeout)
    }

    /// Append a record, waiting at most `timeout` for room under
    /// [`OverflowPolicy::Block`]. Other policies never wait.
    pub fn push_timeout(&self, record: Record, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if state.entries.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::DropOldest => {
                    state.entries.pop_front();
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    trace!(capacity = self.capacity, "Evicted oldest queue entry");
                }
                OverflowPolicy::DropNewest => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    trace!(capacity = self.capacity, "Rejected entry on full queue");
                    return false;
                }
                OverflowPolicy::Block => {
                    let deadline = Instant::now() + timeout;
                    while state.entries.len() >= self.capacity && !state.closed {
                        if self.not_full.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    if state.closed || state.entries.len() >= self.capacity {
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        return false;
                    }
                }
            }
        }

        state.entries.push_back(QueueEntry {
            record,
            arrived: Instant::now(),
        });
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.level.send_replace(state.entries.len());
        drop(state);
        self.not_empty.notify_one();
        true
    }

    /// Remove the head entry, waiting at most `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, or immediately once the queue is closed and
    /// drained.
    pub fn pop(&self, timeout: Duration) -> Option<QueueEntry> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.entries.is_empty() {
            if state.closed {
                return None;
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let entry = state.entries.pop_front()?;
        self.popped.fetch_add(1, Ordering::Relaxed);
        self.level.send_replace(state.entries.len());
        drop(state);
        self.not_full.notify_one();
        Some(entry)
    }

    /// Remove the head entry without waiting.
    pub fn try_pop(&self) -> Option<QueueEntry> {
        self.pop(Duration::ZERO)
    }

    /// Discard every queued entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        self.clear_oldest(usize::MAX)
    }

    /// Discard up to `n` entries from the head. Returns how many were removed.
    pub fn clear_oldest(&self, n: usize) -> usize {
        let mut state = self.state.lock();
        let removed = n.min(state.entries.len());
        state.entries.drain(..removed);
        self.cleared.fetch_add(removed as u64, Ordering::Relaxed);
        self.level.send_replace(state.entries.len());
        drop(state);
        if removed > 0 {
            self.not_full.notify_all();
        }
        removed
    }

    /// Refuse further pushes and wake every waiter.
    ///
    /// Entries already queued can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Watch the number of queued entries.
    pub fn subscribe_level(&self) -> watch::Receiver<usize> {
        self.level.subscribe()
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn record(n: u32) -> Record {
        Record::new(0xFF50, n.to_be_bytes().to_vec()).with_sequence(n)
    }

    fn sequences(queue: &BoundedRecordQueue) -> Vec<u32> {
        std::iter::from_fn(|| queue.try_pop())
            .filter_map(|e| e.record.sequence())
            .collect()
    }

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let queue = BoundedRecordQueue::new(3, OverflowPolicy::DropOldest);
        for n in 0..10 {
            assert!(queue.push(record(n)));
            assert!(queue.len() <= 3);
        }
        assert_eq!(queue.stats().evicted, 7);
        assert_eq!(sequences(&queue), vec![7, 8, 9]);
    }

    #[test]
    fn test_drop_newest_rejects_incoming() {
        let queue = BoundedRecordQueue::new(2, OverflowPolicy::DropNewest);
        assert!(queue.push(record(0)));
        assert!(queue.push(record(1)));
        assert!(!queue.push(record(2)));
        assert_eq!(queue.stats().rejected, 1);
        assert_eq!(sequences(&queue), vec![0, 1]);
    }

    #[test]
    fn test_block_times_out_when_full() {
        let queue = BoundedRecordQueue::new(1, OverflowPolicy::Block);
        assert!(queue.push(record(0)));
        let start = Instant::now();
        assert!(!queue.push_timeout(record(1), Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_block_resumes_when_consumer_pops() {
        let queue = Arc::new(BoundedRecordQueue::new(1, OverflowPolicy::Block));
        assert!(queue.push(record(0)));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.pop(Duration::from_millis(100))
            })
        };

        assert!(queue.push_timeout(record(1), Duration::from_secs(2)));
        let first = consumer.join().unwrap().unwrap();
        assert_eq!(first.record.sequence(), Some(0));
        assert_eq!(sequences(&queue), vec![1]);
    }

    #[test]
    fn test_pop_times_out_on_empty_queue() {
        let queue = BoundedRecordQueue::default();
        let start = Instant::now();
        assert!(queue.pop(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_clear_oldest_removes_from_head() {
        let queue = BoundedRecordQueue::new(10, OverflowPolicy::DropOldest);
        for n in 0..5 {
            queue.push(record(n));
        }
        assert_eq!(queue.clear_oldest(2), 2);
        assert_eq!(queue.clear_oldest(0), 0);
        assert_eq!(sequences(&queue), vec![2, 3, 4]);

        for n in 0..4 {
            queue.push(record(n));
        }
        assert_eq!(queue.clear(), 4);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().cleared, 6);
    }

    #[test]
    fn test_closed_queue_drains_then_reports_none() {
        let queue = BoundedRecordQueue::default();
        queue.push(record(1));
        queue.close();
        assert!(!queue.push(record(2)));
        assert_eq!(queue.pop(Duration::from_secs(5)).unwrap().record.sequence(), Some(1));
        let start = Instant::now();
        assert!(queue.pop(Duration::from_secs(5)).is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_level_watch_follows_size() {
        let queue = BoundedRecordQueue::new(4, OverflowPolicy::DropOldest);
        let level = queue.subscribe_level();
        queue.push(record(0));
        queue.push(record(1));
        assert_eq!(*level.borrow(), 2);
        queue.try_pop();
        assert_eq!(*level.borrow(), 1);
        queue.clear();
        assert_eq!(*level.borrow(), 0);
    }
}
