//! Response cache
//!
//! Wraps the generic [`Cache`] with the key scheme, byte budget and
//! invalidation rules the pipeline needs. Keys render as
//! `"{METHOD} {endpoint}"`, followed by `"#{fingerprint}"` when the payload
//! is part of the key, so invalidation patterns can target either part.

use std::sync::Arc;
use std::time::Duration;

use netweave_common::cache::{Cache, CacheConfig, CacheStats, EvictionPolicy};
use netweave_common::resilience::{SharedClock, SystemClock};
use netweave_domain::{CacheEviction, CachePolicyConfig, Headers, Request, Response};
use parking_lot::RwLock;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// What the cache stores for a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Rebuild a response for the request that hit the cache
    pub fn into_response(self, request_id: Uuid) -> Response {
        let mut response = Response::new(self.status, self.headers, self.body);
        response.from_cache = true;
        response.request_id = request_id;
        response
    }
}

/// Cache key for a request
pub fn cache_key(request: &Request, include_payload: bool) -> String {
    let target = match request.base_override() {
        Some(base) => format!("{}{}", base.trim_end_matches('/'), request.endpoint()),
        None => request.endpoint().to_string(),
    };
    let mut key = format!("{} {target}", request.method());
    if include_payload {
        key.push('#');
        key.push_str(&request.payload_fingerprint());
    }
    key
}

/// Map the configured eviction rule onto the generic cache's policy
pub fn eviction_policy(eviction: CacheEviction) -> EvictionPolicy {
    match eviction {
        CacheEviction::Fifo => EvictionPolicy::Fifo,
        CacheEviction::Lru => EvictionPolicy::Lru,
        CacheEviction::Lfu => EvictionPolicy::Lfu,
        CacheEviction::Random => EvictionPolicy::Random,
    }
}

type ResponseStore = Cache<String, CachedResponse, SharedClock>;

/// Byte-bounded cache of successful responses
pub struct ResponseCache {
    store: RwLock<Arc<ResponseStore>>,
    settings: RwLock<CachePolicyConfig>,
    clock: SharedClock,
}

impl ResponseCache {
    pub fn new(settings: CachePolicyConfig) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: CachePolicyConfig, clock: SharedClock) -> Self {
        let store = build_store(&settings, Arc::clone(&clock));
        Self { store: RwLock::new(Arc::new(store)), settings: RwLock::new(settings), clock }
    }

    fn store(&self) -> Arc<ResponseStore> {
        Arc::clone(&self.store.read())
    }

    pub fn settings(&self) -> CachePolicyConfig {
        self.settings.read().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.read().enabled
    }

    /// Key for `request` under the current settings
    pub fn key_for(&self, request: &Request) -> String {
        cache_key(request, self.settings.read().key_includes_payload)
    }

    /// Fresh entry for `key`; expired entries read as absent
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        if !self.is_enabled() {
            return None;
        }
        self.store().get(&key.to_string())
    }

    /// Store a response. `ttl` defaults to the configured TTL. Returns whether
    /// the entry was kept (bodies larger than the budget are not).
    pub fn put(&self, key: String, response: CachedResponse, ttl: Option<Duration>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let ttl = ttl.unwrap_or_else(|| self.settings.read().default_ttl);
        let stored = self.store().insert_with_ttl(key, response, Some(ttl));
        if !stored {
            debug!("response not cached: larger than the cache budget");
        }
        stored
    }

    /// Remove everything (`None`) or every key matching the regex `pattern`.
    /// A pattern that is not a valid regex matches literally.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let store = self.store();
        let removed = match pattern {
            None => {
                let count = store.len();
                store.clear();
                count
            }
            Some(pattern) => {
                let matcher = Regex::new(pattern)
                    .or_else(|_| Regex::new(&regex::escape(pattern)))
                    .ok();
                match matcher {
                    Some(matcher) => store.retain(|key, _| !matcher.is_match(key)),
                    None => 0,
                }
            }
        };
        info!(?pattern, removed, "cache invalidated");
        removed
    }

    /// Drop expired entries now
    pub fn evict_expired(&self) -> usize {
        self.store().cleanup_expired()
    }

    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.store().stats()
    }

    /// Apply new settings. A changed budget or eviction rule starts from an
    /// empty cache; TTL and key changes apply to future writes.
    pub fn reconfigure(&self, settings: CachePolicyConfig) {
        let mut current = self.settings.write();
        let rebuild = current.max_size != settings.max_size
            || current.max_entries != settings.max_entries
            || current.eviction != settings.eviction
            || current.key_includes_payload != settings.key_includes_payload
            || !settings.enabled;
        if rebuild {
            *self.store.write() = Arc::new(build_store(&settings, Arc::clone(&self.clock)));
            debug!("response cache rebuilt");
        }
        *current = settings;
    }

    /// Periodically drop expired entries until `shutdown` fires
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval = cache.settings.read().sweep_interval;
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let removed = cache.evict_expired();
                        if removed > 0 {
                            debug!(removed, "swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("settings", &*self.settings.read())
            .field("entries", &self.len())
            .finish()
    }
}

fn build_store(settings: &CachePolicyConfig, clock: SharedClock) -> ResponseStore {
    let mut config = CacheConfig::builder()
        .max_weight(settings.max_size)
        .default_ttl(settings.default_ttl)
        .eviction_policy(eviction_policy(settings.eviction));
    if let Some(max_entries) = settings.max_entries {
        config = config.max_entries(max_entries);
    }
    Cache::with_clock(config.build(), clock).with_weigher(|response: &CachedResponse| {
        response.body.len()
    })
}
