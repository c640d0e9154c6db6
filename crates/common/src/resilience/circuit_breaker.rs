//! Circuit breaker with a pluggable clock.
//!
//! A breaker moves through `Closed -> Open -> HalfOpen -> Closed`. All
//! read-modify-write on breaker state happens under one lock, so concurrent
//! callers can never observe a half-applied transition or admit two probes
//! when one is configured.
//!
//! Calls are admitted through [`CircuitBreaker::try_acquire`], which hands out
//! a [`CallPermit`]. Settle the permit with [`CallPermit::success`] or
//! [`CallPermit::failure`]. A permit dropped without being settled (the
//! caller was cancelled, or answered from somewhere else) frees its probe
//! slot without counting as either outcome.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{CommonError, CommonResult};

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for time operations to enable deterministic testing
///
/// Production code uses [`SystemClock`]; tests drive [`MockClock`] by hand so
/// timeout-driven transitions can be checked without sleeping.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// A type-erased clock shared between services.
pub type SharedClock = Arc<dyn Clock>;

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed offset, so advancing one advances all.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

//==============================================================================
// Error Types
//==============================================================================

/// Simple configuration error for validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

//==============================================================================
// State and Configuration
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, admitting a limited number of probes
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u64,
    /// Probe successes needed to close the circuit from half-open
    pub success_threshold: u64,
    /// Time to stay open before admitting a probe
    pub open_timeout: Duration,
    /// Maximum concurrent probes in half-open state
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "half_open_max_calls must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u64,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub probes_in_flight: u64,
    pub last_failure_time: Option<Instant>,
    pub opened_at: Option<Instant>,
    pub state_change_time: Instant,
}

#[derive(Debug)]
struct BreakerInner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u64,
    half_open_successes: u64,
    probes_in_flight: u64,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    state_change_time: Instant,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl BreakerInner {
    fn new(config: CircuitBreakerConfig, now: Instant) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            probes_in_flight: 0,
            last_failure_time: None,
            opened_at: None,
            state_change_time: now,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            rejected_calls: 0,
        }
    }

    fn transition(&mut self, name: &str, to: CircuitState, now: Instant) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.state_change_time = now;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.half_open_successes = 0;
                warn!(breaker = name, %from, failures = self.consecutive_failures, "circuit opened");
            }
            CircuitState::HalfOpen => {
                self.half_open_successes = 0;
                info!(breaker = name, "circuit half-open, admitting probe");
            }
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.half_open_successes = 0;
                self.opened_at = None;
                info!(breaker = name, %from, "circuit closed");
            }
        }
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Circuit breaker guarding a single dependency
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    inner: Mutex<BreakerInner>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config())
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self { name: name.into(), inner: Mutex::new(BreakerInner::new(config, now)), clock })
    }

    /// Name this breaker was registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration
    pub fn config(&self) -> CircuitBreakerConfig {
        self.inner.lock().config.clone()
    }

    /// Swap in new settings, keeping the current state and counters.
    ///
    /// The new thresholds apply from the next recorded outcome; an open
    /// circuit measures its remaining time against the new `open_timeout`.
    pub fn update_config(&self, config: CircuitBreakerConfig) -> ConfigResult<()> {
        config.validate()?;
        let mut inner = self.inner.lock();
        debug!(breaker = %self.name, state = %inner.state, "circuit breaker settings updated");
        inner.config = config;
        Ok(())
    }

    /// Ask to run one call.
    ///
    /// An open circuit whose timeout has elapsed moves to half-open and the
    /// caller becomes the probe. Rejections carry the remaining open time.
    pub fn try_acquire(&self) -> CommonResult<CallPermit<'_, C>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let opened_at = inner.opened_at.unwrap_or(inner.state_change_time);
            let elapsed = now.saturating_duration_since(opened_at);
            if elapsed >= inner.config.open_timeout {
                inner.transition(&self.name, CircuitState::HalfOpen, now);
            } else {
                inner.rejected_calls += 1;
                debug!(breaker = %self.name, "circuit open, rejecting call");
                let remaining = inner.config.open_timeout - elapsed;
                return Err(CommonError::circuit_breaker_with_retry(self.name.clone(), remaining));
            }
        }

        let probe = inner.state == CircuitState::HalfOpen;
        if probe {
            if inner.probes_in_flight >= inner.config.half_open_max_calls {
                inner.rejected_calls += 1;
                debug!(breaker = %self.name, "probe already in flight, rejecting call");
                return Err(CommonError::circuit_breaker(self.name.clone()));
            }
            inner.probes_in_flight += 1;
        }

        inner.total_calls += 1;
        Ok(CallPermit { breaker: self, probe, settled: false })
    }

    /// Whether a call would currently be admitted, without reserving a slot.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(inner.state_change_time);
                now.saturating_duration_since(opened_at) >= inner.config.open_timeout
            }
            CircuitState::HalfOpen => inner.probes_in_flight < inner.config.half_open_max_calls,
        }
    }

    /// Record a success that was not admitted through a permit
    pub fn record_success(&self) {
        self.on_success(false);
    }

    /// Record a failure that was not admitted through a permit
    pub fn record_failure(&self) {
        self.on_failure(false);
    }

    fn on_success(&self, probe: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= inner.config.success_threshold {
                    inner.transition(&self.name, CircuitState::Closed, now);
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        inner.total_failures += 1;
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= inner.config.failure_threshold {
                    inner.transition(&self.name, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                inner.transition(&self.name, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u64 {
        self.inner.lock().consecutive_failures
    }

    /// Get a metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            probes_in_flight: inner.probes_in_flight,
            last_failure_time: inner.last_failure_time,
            opened_at: inner.opened_at,
            state_change_time: inner.state_change_time,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let config = inner.config.clone();
        *inner = BreakerInner::new(config, now);
        info!(breaker = %self.name, "circuit breaker manually reset to closed state");
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`].
#[must_use = "settle the permit with success() or failure()"]
pub struct CallPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    probe: bool,
    settled: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    /// Whether this call is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record a successful outcome
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    /// Record a failed outcome
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}

impl<C: Clock> fmt::Debug for CallPermit<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name)
            .field("probe", &self.probe)
            .finish()
    }
}
