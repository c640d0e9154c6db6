//! Error classification shared by every netweave crate.
//!
//! - **`ErrorClassification`**: the one interface the retry executor and the
//!   request pipeline use to decide whether a failure is transient, how loud
//!   it is, and whether the error suggests a delay.
//! - **`ErrorSeverity`**: the severity scale used when logging.
//! - **`CommonError`**: failures raised by the primitives in this crate
//!   (an open breaker, a codec that could not process a payload).
//!
//! Layer errors (`NetworkError` in the domain crate) implement
//! `ErrorClassification` themselves and translate `CommonError` at the seam.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Failures raised by the building blocks in this crate
#[derive(Debug, Clone, PartialEq)]
pub enum CommonError {
    /// Circuit breaker is open, preventing operations
    CircuitBreakerOpen { service: String, retry_after: Option<Duration> },

    /// Payload compression or decompression errors
    Compression { algorithm: String, message: String },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitBreakerOpen { service, retry_after: Some(retry) } => {
                write!(f, "Circuit breaker open for '{service}' (retry in {retry:?})")
            }
            Self::CircuitBreakerOpen { service, retry_after: None } => {
                write!(f, "Circuit breaker open for '{service}'")
            }
            Self::Compression { algorithm, message } => {
                write!(f, "Compression error ({algorithm}): {message}")
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitBreakerOpen { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitBreakerOpen { .. } => ErrorSeverity::Warning,
            Self::Compression { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitBreakerOpen { retry_after, .. } => *retry_after,
            Self::Compression { .. } => None,
        }
    }
}

impl CommonError {
    /// Create a circuit breaker error
    pub fn circuit_breaker<S: Into<String>>(service: S) -> Self {
        Self::CircuitBreakerOpen { service: service.into(), retry_after: None }
    }

    /// Create a circuit breaker error with retry timing
    pub fn circuit_breaker_with_retry<S: Into<String>>(service: S, retry_after: Duration) -> Self {
        Self::CircuitBreakerOpen { service: service.into(), retry_after: Some(retry_after) }
    }

    /// Create a compression error
    pub fn compression<A: Into<String>, S: Into<String>>(algorithm: A, message: S) -> Self {
        Self::Compression { algorithm: algorithm.into(), message: message.into() }
    }
}

/// Standard error classification trait for all error types
///
/// Implement this on every error enum that can surface from a network call
/// so retry and breaker logic can reason about it uniformly.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as timeouts, connectivity loss or a 5xx response.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific delay is recommended (for
    /// example the remaining open time of a breaker).
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}
