//! Response model returned to callers

use std::time::Duration;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::http::Headers;
use crate::errors::{NetworkError, NetworkResult};

/// A completed HTTP exchange, possibly served from cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers as received (after decompression they no longer
    /// carry `Content-Encoding`)
    pub headers: Headers,
    /// Decoded body bytes
    pub body: Vec<u8>,
    /// Served from the response cache without touching the network
    pub from_cache: bool,
    /// Id of the request that produced this response
    pub request_id: Uuid,
    /// Load-balanced server that answered, if any
    pub server_id: Option<String>,
    /// Wall time from dispatch to completion, across retries
    pub latency: Duration,
    /// Transport attempts made (0 for cache hits)
    pub attempts: u32,
}

impl Response {
    /// Minimal response, as produced by a transport before the pipeline
    /// fills in its bookkeeping
    pub fn new(status: u16, headers: Headers, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            from_cache: false,
            request_id: Uuid::nil(),
            server_id: None,
            latency: Duration::ZERO,
            attempts: 0,
        }
    }

    /// Status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> NetworkResult<String> {
        String::from_utf8(self.body.clone()).map_err(|e| NetworkError::Decoding(e.to_string()))
    }

    /// Body decoded as JSON
    pub fn json<T: DeserializeOwned>(&self) -> NetworkResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u32,
    }

    #[test]
    fn test_decoding_helpers() {
        let response = Response::new(200, Headers::new(), br#"{"id":7}"#.to_vec());
        assert!(response.is_success());
        assert_eq!(response.json::<User>().unwrap(), User { id: 7 });
        assert_eq!(response.text().unwrap(), r#"{"id":7}"#);
    }

    #[test]
    fn test_decoding_failures_are_classified() {
        let response = Response::new(200, Headers::new(), vec![0xff, 0xfe]);
        assert!(matches!(response.text(), Err(NetworkError::Decoding(_))));
        assert!(matches!(response.json::<User>(), Err(NetworkError::Decoding(_))));
    }

    #[test]
    fn test_status_ranges() {
        assert!(!Response::new(304, Headers::new(), Vec::new()).is_success());
        assert!(Response::new(204, Headers::new(), Vec::new()).is_success());
    }
}
