//! Core cache implementation
//!
//! Entries carry their own expiry instant and an optional weight. Reads treat
//! an entry as absent once `now >= expires_at` and drop it on the spot.
//! Writes always replace the previous entry for the key. When a write would
//! push the cache over its entry or weight budget, expired entries are purged
//! first and live entries are then evicted per [`EvictionPolicy`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use tracing::trace;

use super::config::{CacheConfig, EvictionPolicy};
use super::stats::{CacheStats, MetricsCollector};
use crate::resilience::{Clock, SystemClock};

/// Computes the weight an entry contributes to `max_weight`
pub type Weigher<V> = Arc<dyn Fn(&V) -> usize + Send + Sync>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    weight: usize,
    expires_at: Option<Instant>,
    inserted_tick: u64,
    accessed_tick: u64,
    reads: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug)]
struct CacheStorage<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    total_weight: usize,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V> CacheStorage<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.total_weight = self.total_weight.saturating_sub(entry.weight);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn victim(&self, policy: EvictionPolicy) -> Option<K> {
        let entries = self.entries.iter();
        match policy {
            EvictionPolicy::Fifo => {
                entries.min_by_key(|(_, e)| e.inserted_tick).map(|(k, _)| k.clone())
            }
            EvictionPolicy::Lru => {
                entries.min_by_key(|(_, e)| e.accessed_tick).map(|(k, _)| k.clone())
            }
            EvictionPolicy::Lfu => {
                entries.min_by_key(|(_, e)| (e.reads, e.inserted_tick)).map(|(k, _)| k.clone())
            }
            EvictionPolicy::Random => {
                self.entries.keys().choose(&mut rand::thread_rng()).cloned()
            }
            EvictionPolicy::None => None,
        }
    }
}

/// Generic thread-safe cache with TTL and weight budgets
///
/// # Type Parameters
/// - `K`: Key type
/// - `V`: Value type, cloned out on read
/// - `C`: Clock used for expiry (defaults to `SystemClock`)
///
/// # Example
/// ```
/// use std::time::Duration;
///
/// use netweave_common::cache::{Cache, CacheConfig};
///
/// let cache: Cache<String, Vec<u8>> = Cache::new(CacheConfig::ttl(Duration::from_secs(60)));
/// cache.insert("k".to_string(), vec![1, 2, 3]);
/// assert_eq!(cache.get(&"k".to_string()), Some(vec![1, 2, 3]));
/// ```
pub struct Cache<K, V, C = SystemClock>
where
    C: Clock,
{
    storage: Mutex<CacheStorage<K, V>>,
    config: CacheConfig,
    weigher: Option<Weigher<V>>,
    metrics: MetricsCollector,
    clock: C,
}

impl<K, V> Cache<K, V, SystemClock>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new cache with the given configuration using system clock
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<K, V, C> Cache<K, V, C>
where
    K: Eq + Hash + Clone,
    V: Clone,
    C: Clock,
{
    /// Create a new cache with a custom clock
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self {
            storage: Mutex::new(CacheStorage { entries: HashMap::new(), total_weight: 0, tick: 0 }),
            config,
            weigher: None,
            metrics: MetricsCollector::default(),
            clock,
        }
    }

    /// Attach a weigher; without one every entry weighs 1
    pub fn with_weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&V) -> usize + Send + Sync + 'static,
    {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert with the configured default TTL
    pub fn insert(&self, key: K, value: V) -> bool {
        self.insert_with_ttl(key, value, self.config.default_ttl)
    }

    /// Insert with an explicit TTL (`None` = never expires).
    ///
    /// Returns `false` when the value cannot be stored: it alone exceeds the
    /// weight budget, or the policy is `None` and the cache is full. Any
    /// previous entry for the key is removed either way.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) -> bool {
        let weight = self.weigher.as_ref().map_or(1, |weigh| weigh(&value));
        let now = self.clock.now();
        let mut storage = self.storage.lock();
        storage.remove(&key);

        if self.config.max_weight.is_some_and(|max| weight > max) {
            trace!(weight, "value larger than cache budget, not stored");
            self.metrics.record_rejection();
            return false;
        }

        let mut purged = false;
        while self.over_budget(&storage, weight) {
            if !purged {
                purged = true;
                let expired = storage.purge_expired(now);
                self.metrics.record_expirations(expired as u64);
                continue;
            }
            match storage.victim(self.config.eviction_policy) {
                Some(victim) => {
                    storage.remove(&victim);
                    self.metrics.record_eviction();
                }
                None => {
                    self.metrics.record_rejection();
                    return false;
                }
            }
        }

        let tick = storage.next_tick();
        storage.total_weight += weight;
        storage.entries.insert(
            key,
            CacheEntry {
                value,
                weight,
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
                inserted_tick: tick,
                accessed_tick: tick,
                reads: 0,
            },
        );
        self.metrics.record_insert();
        true
    }

    fn over_budget(&self, storage: &CacheStorage<K, V>, incoming: usize) -> bool {
        let entries_over =
            self.config.max_entries.is_some_and(|max| storage.entries.len() + 1 > max);
        let weight_over =
            self.config.max_weight.is_some_and(|max| storage.total_weight + incoming > max);
        (entries_over || weight_over) && !storage.entries.is_empty()
    }

    /// Read a live value; expired entries are removed and reported as absent
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut storage = self.storage.lock();

        let expired = match storage.entries.get(key) {
            None => {
                self.metrics.record_miss();
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            storage.remove(key);
            self.metrics.record_expirations(1);
            self.metrics.record_miss();
            return None;
        }

        let tick = storage.next_tick();
        let entry = storage.entries.get_mut(key)?;
        entry.accessed_tick = tick;
        entry.reads += 1;
        self.metrics.record_hit();
        Some(entry.value.clone())
    }

    /// Whether a live entry exists, without touching recency
    pub fn contains_key(&self, key: &K) -> bool {
        let now = self.clock.now();
        self.storage.lock().entries.get(key).is_some_and(|entry| !entry.is_expired(now))
    }

    /// Remove a value from the cache
    pub fn remove(&self, key: &K) -> Option<V> {
        self.storage.lock().remove(key).map(|entry| entry.value)
    }

    /// Keep only entries for which `keep` returns true; returns how many
    /// were removed
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut storage = self.storage.lock();
        let doomed: Vec<K> = storage
            .entries
            .iter()
            .filter(|(key, entry)| !keep(key, &entry.value))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            storage.remove(key);
        }
        doomed.len()
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        let mut storage = self.storage.lock();
        storage.entries.clear();
        storage.total_weight = 0;
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.storage.lock().entries.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed weight of stored entries
    pub fn total_weight(&self) -> usize {
        self.storage.lock().total_weight
    }

    /// Remove expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = self.storage.lock().purge_expired(now);
        self.metrics.record_expirations(removed as u64);
        removed
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let (entries, weight) = {
            let storage = self.storage.lock();
            (storage.entries.len(), storage.total_weight)
        };
        self.metrics.snapshot(entries, weight, self.config.max_entries, self.config.max_weight)
    }
}

impl<K, V, C: Clock> fmt::Debug for Cache<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("config", &self.config).finish_non_exhaustive()
    }
}
