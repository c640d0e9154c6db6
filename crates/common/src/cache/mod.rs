//! Generic TTL cache with entry and weight budgets
//!
//! Supports LRU, LFU, FIFO, Random and no-eviction policies. Entries expire
//! lazily on read; [`Cache::cleanup_expired`] sweeps the rest.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use netweave_common::cache::{Cache, CacheConfig, EvictionPolicy};
//!
//! let config = CacheConfig::builder()
//!     .max_entries(500)
//!     .max_weight(1 << 20)
//!     .default_ttl(Duration::from_secs(300))
//!     .eviction_policy(EvictionPolicy::Lru)
//!     .build();
//!
//! let cache: Cache<String, Vec<u8>> = Cache::new(config).with_weigher(|body: &Vec<u8>| body.len());
//! cache.insert("GET https://example.com/".to_string(), b"hello".to_vec());
//! assert_eq!(cache.stats().weight, 5);
//! ```

mod config;
mod core;
mod stats;

pub use config::{CacheConfig, CacheConfigBuilder, EvictionPolicy};
pub use core::{Cache, Weigher};
pub use stats::CacheStats;
