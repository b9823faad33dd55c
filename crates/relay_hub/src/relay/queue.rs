//! Bounded FIFO between event ingestion and backend delivery.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// One serialized event awaiting backend delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    body: String,
}

impl Envelope {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }
}

/// Counters describing the queue's lifetime traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub accepted: u64,
    pub dropped: u64,
}

/// Fixed-capacity FIFO with a drop-newest overflow policy.
///
/// The hub task enqueues and the forwarder task dequeues, so both sides go
/// through one mutex that also guards the capacity check.
#[derive(Debug)]
pub struct RelayQueue {
    items: Mutex<VecDeque<Envelope>>,
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl RelayQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends `envelope`, or discards it when the queue is already full.
    ///
    /// Queued items are never evicted and the producer is not told about the
    /// drop; overflow is a backpressure policy, not an error.
    pub fn enqueue(&self, envelope: Envelope) {
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            items.push_back(envelope);
            self.accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                "📦 Relay queue full ({} items), dropped newest envelope (total dropped: {})",
                self.capacity, dropped
            );
        }
    }

    /// Removes the oldest envelope.
    pub fn dequeue(&self) -> Option<Envelope> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copies the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Envelope> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
