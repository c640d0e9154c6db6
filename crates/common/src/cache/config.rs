//! Cache configuration types and builder

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which live entry to drop when the cache is over budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently read or written
    #[serde(alias = "LRU")]
    Lru,
    /// Fewest reads, oldest first among ties
    #[serde(alias = "LFU")]
    Lfu,
    /// Oldest write first
    #[default]
    #[serde(alias = "FIFO", alias = "oldest")]
    Fifo,
    /// Uniformly random
    Random,
    /// Never evict live entries; writes over budget are refused
    None,
}

/// Configuration for cache behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries (None = unlimited)
    pub max_entries: Option<usize>,

    /// Maximum summed entry weight (None = unlimited)
    pub max_weight: Option<usize>,

    /// TTL applied by [`Cache::insert`](super::Cache::insert) (None = no expiry)
    pub default_ttl: Option<Duration>,

    /// Eviction policy when a limit is reached
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            max_weight: None,
            default_ttl: None,
            eviction_policy: EvictionPolicy::Fifo,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration builder
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// TTL-only cache without size limits
    pub fn ttl(duration: Duration) -> Self {
        Self { default_ttl: Some(duration), ..Self::default() }
    }

    /// Entry-count bounded LRU cache
    pub fn lru(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            eviction_policy: EvictionPolicy::Lru,
            ..Self::default()
        }
    }
}

/// Builder for CacheConfig with fluent API
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Set maximum number of entries
    pub fn max_entries(mut self, entries: usize) -> Self {
        self.config.max_entries = Some(entries);
        self
    }

    /// Set maximum summed weight
    pub fn max_weight(mut self, weight: usize) -> Self {
        self.config.max_weight = Some(weight);
        self
    }

    /// Set default time-to-live
    pub fn default_ttl(mut self, duration: Duration) -> Self {
        self.config.default_ttl = Some(duration);
        self
    }

    /// Set eviction policy
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.config.eviction_policy = policy;
        self
    }

    /// Build the configuration
    pub fn build(self) -> CacheConfig {
        self.config
    }
}
