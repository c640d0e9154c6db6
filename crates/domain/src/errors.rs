//! Error taxonomy for network calls
//!
//! [`NetworkError`] is what a single attempt can fail with. Once the pipeline
//! gives up it wraps the last error in a [`RequestError`] that records which
//! endpoint was called and how many attempts were made.

use std::time::Duration;

use netweave_common::error::{ErrorClassification, ErrorSeverity};
use netweave_common::impl_token_conversions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::HttpMethod;

/// Failure of a single network attempt
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum NetworkError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("HTTP error {status}")]
    Http { status: u16, body: Vec<u8> },

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Circuit open for {endpoint}")]
    CircuitOpen { endpoint: String, retry_after: Option<Duration> },

    #[error("No server available")]
    NoServerAvailable,

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for single network operations
pub type NetworkResult<T> = std::result::Result<T, NetworkError>;

/// Coarse grouping of [`NetworkError`]s that retry configuration refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Attempt exceeded its deadline
    Timeout,
    /// Transport could not reach the server
    Connectivity,
    /// 5xx response
    ServerError,
    /// 4xx (or other non-2xx, non-5xx) response
    ClientError,
    /// Payload could not be encoded, decoded or understood
    Protocol,
    /// Refused locally by the breaker or the balancer
    Rejected,
    /// Caller cancelled
    Cancelled,
    /// Failed locally before or around dispatch (endpoint, configuration,
    /// security, I/O)
    Local,
}

impl_token_conversions!(FailureClass {
    Timeout => "timeout",
    Connectivity => "connectivity",
    ServerError => "server_error",
    ClientError => "client_error",
    Protocol => "protocol",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Local => "local",
});

impl FailureClass {
    /// Classes retried unless configured otherwise
    pub const DEFAULT_RETRYABLE: [FailureClass; 3] =
        [FailureClass::Timeout, FailureClass::Connectivity, FailureClass::ServerError];
}

impl NetworkError {
    /// Build an HTTP error from a status and raw body
    pub fn http(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::Http { status, body: body.into() }
    }

    /// Which [`FailureClass`] this error falls in
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Timeout(_) => FailureClass::Timeout,
            Self::NetworkUnavailable(_) => FailureClass::Connectivity,
            Self::Http { status, .. } if *status >= 500 => FailureClass::ServerError,
            Self::Http { .. } => FailureClass::ClientError,
            Self::InvalidResponse(_) | Self::Encoding(_) | Self::Decoding(_) => {
                FailureClass::Protocol
            }
            Self::CircuitOpen { .. } | Self::NoServerAvailable => FailureClass::Rejected,
            Self::Cancelled => FailureClass::Cancelled,
            Self::InvalidEndpoint(_)
            | Self::ConnectionNotFound(_)
            | Self::Security(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Internal(_) => FailureClass::Local,
        }
    }

    /// HTTP status, if this is an HTTP error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the caller cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this failure says something about the remote service.
    ///
    /// Cancellation and local refusals are not held against an endpoint's
    /// circuit breaker.
    pub fn counts_against_endpoint(&self) -> bool {
        !matches!(
            self.failure_class(),
            FailureClass::Cancelled | FailureClass::Rejected | FailureClass::Local
        )
    }
}

impl ErrorClassification for NetworkError {
    fn is_retryable(&self) -> bool {
        matches!(
            self.failure_class(),
            FailureClass::Timeout | FailureClass::Connectivity | FailureClass::ServerError
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled => ErrorSeverity::Info,
            Self::Timeout(_) | Self::NetworkUnavailable(_) | Self::CircuitOpen { .. } => {
                ErrorSeverity::Warning
            }
            Self::Http { status, .. } if *status < 500 => ErrorSeverity::Warning,
            Self::NoServerAvailable | Self::Security(_) | Self::Config(_) | Self::Internal(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decoding(err.to_string())
    }
}

impl From<url::ParseError> for NetworkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

/// Terminal failure of a request, with the context a caller needs to pick a
/// fallback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{method} {endpoint} failed after {attempts} attempt(s): {error}")]
pub struct RequestError {
    /// Endpoint as requested (after interceptors)
    pub endpoint: String,
    /// HTTP method of the request
    pub method: HttpMethod,
    /// Transport attempts made; 0 when refused before dispatch
    pub attempts: u32,
    /// Last underlying failure
    #[source]
    pub error: NetworkError,
}

impl RequestError {
    /// Wrap a network error with request context
    pub fn new(method: HttpMethod, endpoint: impl Into<String>, attempts: u32, error: NetworkError) -> Self {
        Self { endpoint: endpoint.into(), method, attempts, error }
    }

    /// The underlying network error
    pub fn kind(&self) -> &NetworkError {
        &self.error
    }

    /// Unwrap into the underlying network error
    pub fn into_inner(self) -> NetworkError {
        self.error
    }

    /// Whether the caller cancelled this request
    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

impl ErrorClassification for RequestError {
    fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }

    fn severity(&self) -> ErrorSeverity {
        self.error.severity()
    }

    fn is_critical(&self) -> bool {
        self.error.is_critical()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.error.retry_after()
    }
}

/// Result type alias for whole requests
pub type RequestResult<T> = std::result::Result<T, RequestError>;
