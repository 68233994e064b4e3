//! Bounded queue between span completion and export.
//!
//! Producers are application threads ending transactions; the only consumer
//! is the export worker. When the queue is full the oldest entry is evicted,
//! so a slow collector costs data, never application latency.
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A fixed-capacity FIFO that evicts its oldest entry on overflow.
pub struct RingBuffer<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` entries. A capacity of zero
    /// is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RingBuffer {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Append `item`, evicting and returning the oldest entry if the buffer
    /// was full.
    ///
    /// The lock is held only for the `VecDeque` operations, which are O(1).
    pub fn push(&self, item: T) -> Option<T> {
        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        };
        let evicted = if items.len() >= self.capacity {
            items.pop_front()
        } else {
            None
        };
        items.push_back(item);
        drop(items);

        if evicted.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Remove up to `max` entries, oldest first.
    pub fn drain_batch(&self, max: usize) -> Vec<T> {
        let mut items = match self.items.lock() {
            Ok(items) => items,
            Err(poisoned) => poisoned.into_inner(),
        };
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many entries were evicted since creation.
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}
