//! Latency histogram with power-of-two millisecond buckets.
//!
//! Bucket `i` counts samples in `(2^(i-1), 2^i]` milliseconds, bucket 0 counts
//! samples up to 1ms and the last bucket absorbs everything slower. Recording
//! is lock-free; percentiles are read from a snapshot and report the upper
//! bound of the bucket containing the rank, clamped to the observed maximum.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const NUM_BUCKETS: usize = 18;

/// Concurrent latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    count: AtomicU64,
    sum_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Histogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            max_micros: AtomicU64::new(0),
        }
    }

    fn bucket_for(duration: Duration) -> usize {
        let millis = duration.as_micros().div_ceil(1000);
        if millis <= 1 {
            return 0;
        }
        let bits = u128::BITS - (millis - 1).leading_zeros();
        (bits as usize).min(NUM_BUCKETS - 1)
    }

    fn bucket_upper_bound(bucket: usize) -> Duration {
        Duration::from_millis(1u64 << bucket)
    }

    /// Record one sample
    pub fn record(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.buckets[Self::bucket_for(duration)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self.sum_micros.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |sum| {
            Some(sum.saturating_add(micros))
        });
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Number of recorded samples
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed)),
            count: self.count.load(Ordering::Relaxed),
            sum_micros: self.sum_micros.load(Ordering::Relaxed),
            max_micros: self.max_micros.load(Ordering::Relaxed),
        }
    }

    /// Clear all samples
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.sum_micros.store(0, Ordering::Relaxed);
        self.max_micros.store(0, Ordering::Relaxed);
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of histogram statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramSnapshot {
    buckets: [u64; NUM_BUCKETS],
    count: u64,
    sum_micros: u64,
    max_micros: u64,
}

impl HistogramSnapshot {
    /// Total number of samples
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean latency, `None` when empty
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_micros(self.sum_micros / self.count))
    }

    /// Slowest recorded sample, `None` when empty
    pub fn max(&self) -> Option<Duration> {
        (self.count > 0).then(|| Duration::from_micros(self.max_micros))
    }

    /// Latency below which `quantile` (0.0..=1.0) of samples fall
    pub fn percentile(&self, quantile: f64) -> Option<Duration> {
        if self.count == 0 {
            return None;
        }
        let quantile = quantile.clamp(0.0, 1.0);
        let rank = ((self.count as f64 * quantile).ceil() as u64).max(1);
        let max = Duration::from_micros(self.max_micros);

        let mut seen = 0u64;
        for (bucket, hits) in self.buckets.iter().enumerate() {
            seen += hits;
            if seen >= rank {
                return Some(Histogram::bucket_upper_bound(bucket).min(max));
            }
        }
        Some(max)
    }

    /// Median latency
    pub fn p50(&self) -> Option<Duration> {
        self.percentile(0.50)
    }

    /// 95th percentile latency
    pub fn p95(&self) -> Option<Duration> {
        self.percentile(0.95)
    }

    /// 99th percentile latency
    pub fn p99(&self) -> Option<Duration> {
        self.percentile(0.99)
    }
}
