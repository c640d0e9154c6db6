//! Conversions from external infrastructure errors into network errors.

use std::time::Duration;

use netweave_domain::NetworkError;
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub NetworkError);

impl From<InfraError> for NetworkError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<NetworkError> for InfraError {
    fn from(value: NetworkError) -> Self {
        InfraError(value)
    }
}

trait IntoNetworkError {
    fn into_network(self) -> NetworkError;
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → NetworkError */
/* -------------------------------------------------------------------------- */

impl IntoNetworkError for HttpError {
    fn into_network(self) -> NetworkError {
        if self.is_builder() {
            return NetworkError::InvalidEndpoint(self.to_string());
        }

        #[cfg(not(target_arch = "wasm32"))]
        if self.is_connect() {
            return NetworkError::NetworkUnavailable(format!("connection failure: {self}"));
        }

        if self.is_decode() || self.is_body() {
            return NetworkError::InvalidResponse(self.to_string());
        }

        if let Some(status) = self.status() {
            return NetworkError::http(status.as_u16(), Vec::new());
        }

        NetworkError::NetworkUnavailable(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_network())
    }
}

/* -------------------------------------------------------------------------- */
/* std::io / parser errors → NetworkError */
/* -------------------------------------------------------------------------- */

impl From<std::io::Error> for InfraError {
    fn from(value: std::io::Error) -> Self {
        InfraError(NetworkError::Io(value.to_string()))
    }
}

impl From<toml::de::Error> for InfraError {
    fn from(value: toml::de::Error) -> Self {
        InfraError(NetworkError::Config(format!("Invalid TOML format: {value}")))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(NetworkError::Config(format!("Invalid JSON format: {value}")))
    }
}

/// Map a failed exchange; timeouts carry the deadline the attempt ran under
pub(crate) fn transport_error(err: HttpError, timeout: Duration) -> NetworkError {
    if err.is_timeout() {
        return NetworkError::Timeout(timeout);
    }
    InfraError::from(err).into()
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
