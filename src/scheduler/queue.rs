//! Lock-free work queues.

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A lock-free FIFO with an approximate depth counter and an optional soft
/// capacity.
///
/// Many submitters may offer concurrently. Partition queues have a single
/// consumer (the owning worker), the generic pair is drained by every
/// generic worker, so ordering is strict per partition and loose across
/// the generic pool. Capacity is enforced against the approximate counter;
/// brief overshoot under contention is possible and accepted.
#[derive(Debug)]
pub(crate) struct WorkQueue<T> {
    items: SegQueue<T>,
    depth: AtomicUsize,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    /// Creates a queue. `capacity` of 0 means unbounded.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: SegQueue::new(),
            depth: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Offers an item, refusing when a capacity is configured and reached.
    ///
    /// On refusal the item is handed back so the caller's overload policy
    /// can decide what to do with it.
    pub(crate) fn offer(&self, item: T) -> Result<(), T> {
        if self.capacity != 0 && self.depth.load(Ordering::Relaxed) >= self.capacity {
            return Err(item);
        }
        self.push(item);
        Ok(())
    }

    /// Offers an item regardless of any configured capacity.
    ///
    /// Priority items and wakeup sentinels go through here: a refused
    /// sentinel would leave a sleeping worker unaware of queued priority
    /// work.
    pub(crate) fn push(&self, item: T) {
        self.items.push(item);
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Pops the oldest item, if any. Never blocks.
    pub(crate) fn poll(&self) -> Option<T> {
        let item = self.items.pop();
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }

    /// Approximate number of queued items.
    pub(crate) fn len(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Configured capacity (0 = unbounded).
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}
