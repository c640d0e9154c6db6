//! Port interfaces the networking engine depends on
//!
//! The core never talks to an HTTP library directly. Adapters in
//! `netweave-infra` (or test doubles) implement these traits and are handed
//! to [`NetworkCore`](crate::NetworkCore) at construction.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use netweave_domain::{
    EventMetadata, Headers, HttpMethod, NetworkEvent, NetworkResult, Request, SecurityConfig,
};
use url::Url;
use uuid::Uuid;

/// Lazily produced body chunks
pub type ByteStream = BoxStream<'static, NetworkResult<Vec<u8>>>;

/// One attempt as handed to the transport
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub request_id: Uuid,
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    /// Time left for this attempt
    pub timeout: Duration,
    /// Pool lease the attempt runs under
    pub connection_id: u64,
}

/// Raw response as received, before decryption and decompression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Headers::new(), body: body.into() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Response whose body is consumed incrementally
pub struct StreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: ByteStream,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Basic HTTP transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one exchange and buffer the body
    async fn send(&self, request: TransportRequest) -> NetworkResult<TransportResponse>;

    /// Open an exchange whose body is read as a stream
    async fn open_stream(&self, request: TransportRequest) -> NetworkResult<StreamResponse>;
}

/// Vets outgoing requests and optionally encrypts payloads
#[async_trait]
pub trait SecurityProvider: Send + Sync {
    /// Refuse requests that must not leave the process
    async fn validate(&self, request: &Request) -> NetworkResult<()>;

    /// Transform an outgoing body
    async fn encrypt(&self, _request: &Request, body: Vec<u8>) -> NetworkResult<Vec<u8>> {
        Ok(body)
    }

    /// Transform an incoming body
    async fn decrypt(&self, _request: &Request, body: Vec<u8>) -> NetworkResult<Vec<u8>> {
        Ok(body)
    }

    /// Apply the `security` section of a new configuration
    fn configure(&self, _config: &SecurityConfig) {}
}

/// Receives analytics events. Must return promptly.
pub trait AnalyticsSink: Send + Sync {
    fn track_event(&self, event: NetworkEvent, metadata: EventMetadata);
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn track_event(&self, _event: NetworkEvent, _metadata: EventMetadata) {}
}

/// Checks whether a server answers
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when the server at `url` is fit to receive traffic
    async fn probe(&self, url: &Url) -> bool;
}
