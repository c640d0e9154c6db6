//! Building blocks shared across the netweave crates.
//!
//! Nothing in here knows about HTTP. The networking crates layer their
//! request model and error taxonomy on top of these primitives.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, collections, compression, utilities
//! - `runtime`: cache and resilience (circuit breaker, retry, histogram)
//! - `observability`: tracing of state transitions

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod collections;
#[cfg(feature = "foundation")]
pub mod compression;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
#[macro_use]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod cache;
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use cache::{Cache, CacheConfig, CacheStats, EvictionPolicy};
#[cfg(feature = "foundation")]
pub use collections::StablePriorityQueue;
#[cfg(feature = "foundation")]
pub use compression::CompressionAlgorithm;
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    BackoffStrategy, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
    CircuitState, Clock, Histogram, HistogramSnapshot, Jitter, MockClock, RetryConfig,
    RetryDecision, RetryError, RetryExecutor, RetryPolicy, SharedClock, SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::{duration_millis, fingerprint, Fingerprint};
