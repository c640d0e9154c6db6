//! Specialized data structures
//!
//! - **[`priority_queue`]**: stable max-priority queue (FIFO among equals)

pub mod priority_queue;

pub use priority_queue::StablePriorityQueue;
