//! Resilience patterns for fault tolerance
//!
//! - **Circuit Breaker**: stops calling a failing dependency until it has had
//!   time to recover, then admits a bounded number of probes.
//! - **Retry**: re-runs transient failures with fixed, linear, exponential or
//!   custom backoff.
//! - **Histogram**: lock-free latency distribution used by monitors.
//!
//! Everything here is generic over the error type and the clock; the
//! networking crates plug in their own error taxonomy through
//! [`ErrorClassification`](crate::error::ErrorClassification).

pub mod circuit_breaker;
pub mod histogram;
pub mod retry;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitState, Clock, ConfigError, ConfigResult, MockClock,
    SharedClock, SystemClock,
};
pub use histogram::{Histogram, HistogramSnapshot};
pub use retry::{
    policies, BackoffFn, BackoffStrategy, Jitter, RetryConfig, RetryConfigBuilder, RetryDecision,
    RetryError, RetryExecutor, RetryPolicy, RetryResult,
};
