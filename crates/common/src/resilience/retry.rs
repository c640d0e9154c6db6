//! Generic retry executor with pluggable backoff and retry policies.
//!
//! The executor runs an operation up to `max_attempts` times. After each
//! failure the policy decides whether the error is worth another attempt; the
//! final attempt's error always propagates. Between attempts the executor
//! sleeps `backoff.calculate_delay(attempt)` on the tokio timer, so dropping
//! the returned future cancels a pending backoff immediately.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error
    #[error("All retry attempts exhausted after {attempts} tries: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The policy refused to retry this error
    #[error("Operation failed with non-retryable error after {attempts} tries: {source}")]
    NonRetryable { attempts: u32, source: E },

    /// The total retry time budget ran out before the next attempt
    #[error("Retry time budget exceeded after {elapsed:?} ({attempts} tries): {source}")]
    TimeoutExceeded { attempts: u32, elapsed: Duration, source: E },

    /// The retry configuration is invalid
    #[error("Invalid retry configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::TimeoutExceeded { attempts, .. } => *attempts,
            Self::InvalidConfiguration { .. } => 0,
        }
    }

    /// The last underlying error, if an attempt ran
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Exhausted { source, .. }
            | Self::NonRetryable { source, .. }
            | Self::TimeoutExceeded { source, .. } => Some(source),
            Self::InvalidConfiguration { .. } => None,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide what to do after `error` on the zero-based `attempt`
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the configured backoff delay
    Retry,
    /// Retry the operation after a specific delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Caller-supplied delay function of the zero-based attempt index
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Backoff strategy for calculating retry delays
#[derive(Clone)]
pub enum BackoffStrategy {
    /// Same delay after every failure
    Fixed(Duration),
    /// `unit * attempt`
    Linear { unit: Duration },
    /// `unit * 2^attempt`, capped at `max_delay`
    Exponential { unit: Duration, max_delay: Duration },
    /// Caller-supplied function
    Custom(BackoffFn),
}

impl BackoffStrategy {
    /// Wrap a closure as a custom strategy
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Calculate the delay that follows a failure on `attempt`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Linear { unit } => unit.saturating_mul(attempt),
            BackoffStrategy::Exponential { unit, max_delay } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                unit.saturating_mul(factor).min(*max_delay)
            }
            BackoffStrategy::Custom(f) => f(attempt),
        }
    }
}

impl fmt::Debug for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Linear { unit } => f.debug_struct("Linear").field("unit", unit).finish(),
            Self::Exponential { unit, max_delay } => f
                .debug_struct("Exponential")
                .field("unit", unit)
                .field("max_delay", max_delay)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter
    #[default]
    None,
    /// Uniform in `0..=delay`
    Full,
    /// Uniform in `delay/2..=delay`
    Equal,
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rand::thread_rng().gen_range(0..=millis)),
            Jitter::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=millis - half))
            }
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Jitter type for randomizing delays
    pub jitter: Jitter,
    /// Maximum total time to spend retrying
    pub max_total_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                unit: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
            },
            jitter: Jitter::None,
            max_total_time: None,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RetryError<()>> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfiguration {
                message: "max_attempts must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    pub fn linear_backoff(mut self, unit: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Linear { unit };
        self
    }

    pub fn exponential_backoff(mut self, unit: Duration, max_delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { unit, max_delay };
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn max_total_time(mut self, duration: Duration) -> Self {
        self.config.max_total_time = Some(duration);
        self
    }

    pub fn build(self) -> Result<RetryConfig, RetryError<()>> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    /// Active configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_observed(operation, |_, _, _| {}).await
    }

    /// Execute an operation, calling `on_retry(error, attempt, delay)` before
    /// each backoff sleep.
    ///
    /// The operation receives the zero-based attempt index.
    pub async fn execute_observed<F, Fut, T, E, O>(
        &self,
        mut operation: F,
        mut on_retry: O,
    ) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnMut(&E, u32, Duration),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            debug!(attempt = attempt + 1, max_attempts, "executing attempt");

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };
            let attempts = attempt + 1;

            let delay = match self.policy.should_retry(&error, attempt) {
                RetryDecision::Stop => {
                    debug!(attempts, ?error, "retry policy declined to retry");
                    return Err(RetryError::NonRetryable { attempts, source: error });
                }
                _ if attempts >= max_attempts => {
                    warn!(attempts, ?error, "all retry attempts exhausted");
                    return Err(RetryError::Exhausted { attempts, source: error });
                }
                RetryDecision::Retry => {
                    self.config.jitter.apply(self.config.backoff.calculate_delay(attempt))
                }
                RetryDecision::RetryAfter(delay) => delay,
            };

            if let Some(budget) = self.config.max_total_time {
                let elapsed = started.elapsed();
                if elapsed + delay > budget {
                    warn!(attempts, ?elapsed, "retry time budget exceeded");
                    return Err(RetryError::TimeoutExceeded { attempts, elapsed, source: error });
                }
            }

            warn!(attempt = attempts, ?delay, ?error, "attempt failed, backing off");
            on_retry(&error, attempt, delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::*;
    use crate::error::ErrorClassification;

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retry policy - never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries whatever [`ErrorClassification::is_retryable`] accepts,
    /// honouring `retry_after` hints.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ClassifiedRetry;

    impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            match error.retry_after() {
                Some(delay) => RetryDecision::RetryAfter(delay),
                None => RetryDecision::Retry,
            }
        }
    }

    /// Predicate-based retry policy
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}
