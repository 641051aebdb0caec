//! Bounded blocking deque
//!
//! A FIFO queue with a head-insert escape hatch, used to couple the packet
//! engine to the TUN device's write side: packets are appended with [`put`],
//! drained with [`poll`], and a packet whose write hit EAGAIN goes back to
//! the head with [`put_first`] so retry order matches arrival order.
//!
//! Capacity is enforced with two counting semaphores, `filled` (starts at 0)
//! and `holes` (starts at the capacity): producers wait on `holes`,
//! consumers wait on `filled`, and each side releases the other's semaphore
//! after mutating the storage under the exclusive lock.
//!
//! [`put`]: BlockingDeque::put
//! [`poll`]: BlockingDeque::poll
//! [`put_first`]: BlockingDeque::put_first

use std::collections::VecDeque;
use std::sync::RwLock;

use crate::semaphore::Semaphore;
use crate::{read, write};

/// A bounded, thread-safe FIFO deque with blocking inserts and removals.
pub struct BlockingDeque<T> {
    capacity: usize,
    filled: Semaphore,
    holes: Semaphore,
    items: RwLock<VecDeque<T>>,
}

impl<T> BlockingDeque<T> {
    /// Create a deque with no practical capacity bound.
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Create a deque holding at most `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            filled: Semaphore::new(0),
            holes: Semaphore::new(capacity),
            items: RwLock::new(VecDeque::new()),
        }
    }

    /// Maximum number of elements the deque can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements currently queued.
    pub fn len(&self) -> usize {
        read(&self.items).len()
    }

    /// Whether the deque holds no elements.
    pub fn is_empty(&self) -> bool {
        read(&self.items).is_empty()
    }

    /// Number of additional elements accepted without blocking.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Insert at the tail, waiting for space if the deque is full.
    pub fn put(&self, item: T) {
        self.holes.acquire();
        write(&self.items).push_back(item);
        self.filled.release();
    }

    /// Insert at the head, waiting for space if the deque is full.
    ///
    /// The next [`take`](Self::take) or [`poll`](Self::poll) returns this
    /// element.
    pub fn put_first(&self, item: T) {
        self.holes.acquire();
        write(&self.items).push_front(item);
        self.filled.release();
    }

    /// Insert at the tail without blocking.
    ///
    /// Returns `false` if the deque is at capacity.
    pub fn offer(&self, item: T) -> bool {
        if !self.holes.try_acquire() {
            return false;
        }
        write(&self.items).push_back(item);
        self.filled.release();
        true
    }

    /// Remove the head element, waiting until one is available.
    pub fn take(&self) -> T {
        loop {
            self.filled.acquire();
            if let Some(item) = write(&self.items).pop_front() {
                self.holes.release();
                return item;
            }
            // The permit raced with clear(); wait for the next element.
        }
    }

    /// Remove the head element without blocking.
    pub fn poll(&self) -> Option<T> {
        if !self.filled.try_acquire() {
            return None;
        }
        match write(&self.items).pop_front() {
            Some(item) => {
                self.holes.release();
                Some(item)
            }
            // The permit raced with clear(); it is already accounted for.
            None => None,
        }
    }

    /// Remove every element.
    ///
    /// Permits are rebalanced exactly: one `filled` permit consumed and one
    /// `holes` permit released per removed element, so blocked producers
    /// wake and a consumer never observes a permit without an element.
    pub fn clear(&self) {
        let mut items = write(&self.items);
        let drained = items.len();
        items.clear();
        for _ in 0..drained {
            // try_acquire fails only when a concurrent take() already holds
            // the permit; that take sees the empty deque and re-waits.
            let _ = self.filled.try_acquire();
            self.holes.release();
        }
    }

    /// Visit each element in order under a shared lock.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        for item in read(&self.items).iter() {
            f(item);
        }
    }

    /// Return a clone of the first element matching `pred`.
    pub fn first(&self, pred: impl Fn(&T) -> bool) -> Option<T>
    where
        T: Clone,
    {
        read(&self.items).iter().find(|&item| pred(item)).cloned()
    }
}

impl<T> Default for BlockingDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}
