//! Passive performance and health aggregation
//!
//! The pipeline reports every outcome here. Readers either take a
//! [`NetworkMetrics`] snapshot or subscribe to a watch channel that is
//! refreshed after each recorded outcome.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use netweave_common::impl_token_conversions;
use netweave_common::resilience::Histogram;
use netweave_common::utils::serde::option_duration_millis;
use netweave_domain::NetworkError;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

/// Outcomes kept for the health window
pub const DEFAULT_HEALTH_WINDOW: usize = 50;

/// Outcomes needed before the window can report anything but healthy
const MIN_WINDOW_SAMPLES: usize = 5;

/// Coarse view of recent network conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkHealth {
    #[default]
    Healthy,
    /// At least 10% of recent outcomes failed
    Degraded,
    /// At least half of recent outcomes failed
    Unhealthy,
}

impl_token_conversions!(NetworkHealth {
    Healthy => "healthy",
    Degraded => "degraded",
    Unhealthy => "unhealthy",
});

impl NetworkHealth {
    fn from_failure_rate(rate: f64) -> Self {
        if rate >= 0.5 {
            Self::Unhealthy
        } else if rate >= 0.1 {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

/// Per-endpoint counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMetrics {
    pub requests: u64,
    pub failures: u64,
    #[serde(with = "option_duration_millis")]
    pub mean_latency: Option<Duration>,
}

/// Point-in-time view of the monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cancellations: u64,
    pub retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    #[serde(with = "option_duration_millis")]
    pub p50_latency: Option<Duration>,
    #[serde(with = "option_duration_millis")]
    pub p95_latency: Option<Duration>,
    #[serde(with = "option_duration_millis")]
    pub p99_latency: Option<Duration>,
    /// Failure share of the recent window
    pub recent_failure_rate: f64,
    pub health: NetworkHealth,
    pub endpoints: BTreeMap<String, EndpointMetrics>,
}

#[derive(Debug, Default)]
struct EndpointCounters {
    requests: AtomicU64,
    failures: AtomicU64,
    timed: AtomicU64,
    latency_micros: AtomicU64,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
    retries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// Aggregates request outcomes
#[derive(Debug)]
pub struct PerformanceMonitor {
    counters: Counters,
    latency: Histogram,
    endpoints: DashMap<String, EndpointCounters>,
    window: Mutex<VecDeque<bool>>,
    window_size: usize,
    updates: watch::Sender<NetworkMetrics>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_WINDOW)
    }
}

impl PerformanceMonitor {
    /// Monitor judging health over the last `window_size` outcomes
    pub fn new(window_size: usize) -> Self {
        let (updates, _) = watch::channel(NetworkMetrics::default());
        Self {
            counters: Counters::default(),
            latency: Histogram::new(),
            endpoints: DashMap::new(),
            window: Mutex::new(VecDeque::with_capacity(window_size.max(1))),
            window_size: window_size.max(1),
            updates,
        }
    }

    pub fn record_success(&self, endpoint: &str, latency: Duration, bytes_sent: u64, bytes_received: u64) {
        let c = &self.counters;
        c.total.fetch_add(1, Ordering::Relaxed);
        c.successes.fetch_add(1, Ordering::Relaxed);
        c.bytes_sent.fetch_add(bytes_sent, Ordering::Relaxed);
        c.bytes_received.fetch_add(bytes_received, Ordering::Relaxed);
        self.latency.record(latency);
        self.record_endpoint(endpoint, Some(latency), false);
        self.push_outcome(true);
        self.publish();
    }

    /// A terminal failure. Local refusals (open circuit, no server, bad
    /// input) count toward totals but not toward health.
    pub fn record_failure(&self, endpoint: &str, latency: Duration, error: &NetworkError) {
        if error.is_cancelled() {
            self.record_cancelled(endpoint);
            return;
        }
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        let reached_network = error.counts_against_endpoint();
        if reached_network {
            self.latency.record(latency);
            self.push_outcome(false);
        }
        self.record_endpoint(endpoint, reached_network.then_some(latency), true);
        self.publish();
    }

    pub fn record_cancelled(&self, endpoint: &str) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.cancellations.fetch_add(1, Ordering::Relaxed);
        self.record_endpoint(endpoint, None, false);
        self.publish();
    }

    /// A request answered from cache
    pub fn record_cache_hit(&self, endpoint: &str) {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.successes.fetch_add(1, Ordering::Relaxed);
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.record_endpoint(endpoint, None, false);
        self.publish();
    }

    pub fn record_cache_miss(&self) {
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes read from a streamed body
    pub fn record_bytes_received(&self, bytes: u64) {
        self.counters.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_endpoint(&self, endpoint: &str, latency: Option<Duration>, failed: bool) {
        let update = |counters: &EndpointCounters| {
            counters.requests.fetch_add(1, Ordering::Relaxed);
            if failed {
                counters.failures.fetch_add(1, Ordering::Relaxed);
            }
            if let Some(latency) = latency {
                let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
                counters.timed.fetch_add(1, Ordering::Relaxed);
                counters.latency_micros.fetch_add(micros, Ordering::Relaxed);
            }
        };
        if let Some(counters) = self.endpoints.get(endpoint) {
            update(counters.value());
            return;
        }
        update(self.endpoints.entry(endpoint.to_string()).or_default().value());
    }

    fn push_outcome(&self, success: bool) {
        let mut window = self.window.lock();
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(success);
    }

    fn recent_failure_rate(&self) -> (f64, usize) {
        let window = self.window.lock();
        if window.is_empty() {
            return (0.0, 0);
        }
        let failures = window.iter().filter(|ok| !**ok).count();
        (failures as f64 / window.len() as f64, window.len())
    }

    /// Health judged from the recent window
    pub fn health(&self) -> NetworkHealth {
        let (rate, samples) = self.recent_failure_rate();
        if samples < MIN_WINDOW_SAMPLES {
            return NetworkHealth::Healthy;
        }
        NetworkHealth::from_failure_rate(rate)
    }

    pub fn snapshot(&self) -> NetworkMetrics {
        let c = &self.counters;
        let latency = self.latency.snapshot();
        let (recent_failure_rate, _) = self.recent_failure_rate();
        let endpoints = self
            .endpoints
            .iter()
            .map(|entry| {
                let counters = entry.value();
                let timed = counters.timed.load(Ordering::Relaxed);
                let mean_latency = (timed > 0).then(|| {
                    Duration::from_micros(counters.latency_micros.load(Ordering::Relaxed) / timed)
                });
                let metrics = EndpointMetrics {
                    requests: counters.requests.load(Ordering::Relaxed),
                    failures: counters.failures.load(Ordering::Relaxed),
                    mean_latency,
                };
                (entry.key().clone(), metrics)
            })
            .collect();

        NetworkMetrics {
            total_requests: c.total.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            cancellations: c.cancellations.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            bytes_sent: c.bytes_sent.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            p50_latency: latency.p50(),
            p95_latency: latency.p95(),
            p99_latency: latency.p99(),
            recent_failure_rate,
            health: self.health(),
            endpoints,
        }
    }

    /// Receiver that sees a fresh snapshot after every recorded outcome
    pub fn subscribe(&self) -> watch::Receiver<NetworkMetrics> {
        let receiver = self.updates.subscribe();
        self.updates.send_replace(self.snapshot());
        receiver
    }

    fn publish(&self) {
        if self.updates.receiver_count() > 0 {
            self.updates.send_replace(self.snapshot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_endpoints() {
        let monitor = PerformanceMonitor::default();
        monitor.record_success("/a", Duration::from_millis(10), 100, 2000);
        monitor.record_success("/a", Duration::from_millis(30), 0, 500);
        monitor.record_failure("/b", Duration::from_millis(5), &NetworkError::http(503, ""));
        monitor.record_cache_hit("/a");
        monitor.record_cache_miss();
        monitor.record_retry();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!((snapshot.successes, snapshot.failures), (3, 1));
        assert_eq!((snapshot.cache_hits, snapshot.cache_misses, snapshot.retries), (1, 1, 1));
        assert_eq!((snapshot.bytes_sent, snapshot.bytes_received), (100, 2500));

        let a = &snapshot.endpoints["/a"];
        assert_eq!((a.requests, a.failures), (3, 0));
        assert_eq!(a.mean_latency, Some(Duration::from_millis(20)));
        assert_eq!(snapshot.endpoints["/b"].failures, 1);
        assert!(snapshot.p50_latency.is_some());
    }

    #[test]
    fn test_health_follows_recent_window() {
        let monitor = PerformanceMonitor::new(10);
        for _ in 0..4 {
            monitor.record_failure("/a", Duration::from_millis(1), &NetworkError::Timeout(Duration::from_secs(1)));
        }
        // not enough samples yet
        assert_eq!(monitor.health(), NetworkHealth::Healthy);

        monitor.record_success("/a", Duration::from_millis(1), 0, 0);
        assert_eq!(monitor.health(), NetworkHealth::Unhealthy);

        for _ in 0..8 {
            monitor.record_success("/a", Duration::from_millis(1), 0, 0);
        }
        // window now holds 1 failure out of 10
        assert_eq!(monitor.health(), NetworkHealth::Degraded);

        for _ in 0..2 {
            monitor.record_success("/a", Duration::from_millis(1), 0, 0);
        }
        assert_eq!(monitor.health(), NetworkHealth::Healthy);
    }

    #[test]
    fn test_local_refusals_do_not_affect_health() {
        let monitor = PerformanceMonitor::new(10);
        for _ in 0..10 {
            monitor.record_failure("/a", Duration::ZERO, &NetworkError::NoServerAvailable);
            monitor.record_failure("/a", Duration::ZERO, &NetworkError::Cancelled);
        }
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.health, NetworkHealth::Healthy);
        assert_eq!((snapshot.failures, snapshot.cancellations), (10, 10));
    }

    #[tokio::test]
    async fn test_subscription_sees_updates() {
        let monitor = PerformanceMonitor::default();
        let mut updates = monitor.subscribe();
        updates.borrow_and_update();

        monitor.record_success("/a", Duration::from_millis(3), 0, 0);
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow_and_update().total_requests, 1);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let value = serde_json::to_value(PerformanceMonitor::default().snapshot()).unwrap();
        assert_eq!(value["health"], "healthy");
        assert!(value.get("recentFailureRate").is_some());
        assert!(value["p50Latency"].is_null());
    }
}
