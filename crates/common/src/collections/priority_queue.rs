//! Stable priority queue backed by [`std::collections::BinaryHeap`].
//!
//! Items are popped highest priority first. Items with equal priority pop in
//! insertion order, which a plain `BinaryHeap` does not guarantee.
//!
//! # Complexity
//! - `push`: `O(log n)`
//! - `pop`: `O(log n)`
//! - `peek`: `O(1)`
//!
//! # Examples
//! ```
//! use netweave_common::collections::StablePriorityQueue;
//!
//! let mut queue = StablePriorityQueue::new();
//! queue.push(1, "low");
//! queue.push(5, "first high");
//! queue.push(5, "second high");
//! assert_eq!(queue.pop(), Some("first high"));
//! assert_eq!(queue.pop(), Some("second high"));
//! assert_eq!(queue.pop(), Some("low"));
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;

struct Slot<P, T> {
    priority: P,
    seq: Reverse<u64>,
    item: T,
}

impl<P: Ord, T> PartialEq for Slot<P, T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<P: Ord, T> Eq for Slot<P, T> {}

impl<P: Ord, T> PartialOrd for Slot<P, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord, T> Ord for Slot<P, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| self.seq.cmp(&other.seq))
    }
}

/// A max-priority queue with FIFO ordering among equal priorities.
pub struct StablePriorityQueue<P, T> {
    heap: BinaryHeap<Slot<P, T>>,
    next_seq: u64,
}

impl<P: Ord, T> StablePriorityQueue<P, T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), next_seq: 0 }
    }

    /// Creates an empty queue with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(capacity), next_seq: 0 }
    }

    /// Adds an item with the given priority.
    pub fn push(&mut self, priority: P, item: T) {
        let seq = Reverse(self.next_seq);
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(Slot { priority, seq, item });
    }

    /// Removes the highest-priority item, earliest inserted among equals.
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|slot| slot.item)
    }

    /// Removes the highest-priority item together with its priority.
    pub fn pop_with_priority(&mut self) -> Option<(P, T)> {
        self.heap.pop().map(|slot| (slot.priority, slot.item))
    }

    /// Borrows the item that [`pop`](Self::pop) would return next.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.heap.peek().map(|slot| &slot.item)
    }

    /// Returns the number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` when the queue contains no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes all items from the queue.
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Drains every item in pop order.
    pub fn drain_ordered(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.pop() {
            out.push(item);
        }
        out
    }
}

impl<P: Ord, T> Default for StablePriorityQueue<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Ord + fmt::Debug, T> fmt::Debug for StablePriorityQueue<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StablePriorityQueue")
            .field("len", &self.len())
            .field("top_priority", &self.heap.peek().map(|slot| &slot.priority))
            .finish()
    }
}

impl<P: Ord, T> Extend<(P, T)> for StablePriorityQueue<P, T> {
    fn extend<I: IntoIterator<Item = (P, T)>>(&mut self, iter: I) {
        for (priority, item) in iter {
            self.push(priority, item);
        }
    }
}
