use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use netweave_core::{StreamResponse, Transport, TransportRequest, TransportResponse};
use netweave_domain::{Headers, NetworkError, NetworkResult, NetworkingConfiguration};
use reqwest::{Client as ReqwestClient, Method, Response};
use tracing::debug;

use crate::errors::{transport_error, InfraError};

/// [`Transport`] over a shared reqwest client.
///
/// Makes exactly one exchange per call. Retries, decompression and
/// connection accounting happen in the core pipeline; reqwest is built
/// without its own decompression so `Content-Encoding` reaches the codec
/// untouched.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Start building a new transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> NetworkResult<Self> {
        Self::builder().build()
    }

    /// Transport whose idle pool matches the core's connection pool settings
    pub fn from_config(config: &NetworkingConfiguration) -> NetworkResult<Self> {
        Self::builder()
            .pool_max_idle_per_host(config.connection_pool.max_connections_per_host)
            .pool_idle_timeout(config.connection_pool.keep_alive_timeout)
            .build()
    }

    /// The underlying client, for sharing with other adapters
    pub fn client(&self) -> &ReqwestClient {
        &self.client
    }

    async fn execute(&self, request: TransportRequest, whole_exchange: bool) -> NetworkResult<Response> {
        let timeout = request.timeout;
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| NetworkError::InvalidEndpoint(e.to_string()))?;
        let url = request.url;

        let mut builder = self.client.request(method.clone(), url.clone());
        if whole_exchange {
            builder = builder.timeout(timeout);
        }
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let built = builder.build().map_err(|err| NetworkError::from(InfraError::from(err)))?;

        debug!(%method, %url, connection = request.connection_id, "sending HTTP request");
        let response = self.client.execute(built).await.map_err(|err| {
            debug!(%method, %url, error = %err, "HTTP request failed");
            transport_error(err, timeout)
        })?;
        debug!(%method, %url, status = %response.status(), "received HTTP response");
        Ok(response)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> NetworkResult<TransportResponse> {
        let timeout = request.timeout;
        let response = self.execute(request, true).await?;
        let status = response.status().as_u16();
        let headers = response_headers(&response);
        let body = response.bytes().await.map_err(|err| transport_error(err, timeout))?;
        Ok(TransportResponse { status, headers, body: body.to_vec() })
    }

    /// The attempt deadline covers opening the exchange only; reading the
    /// body is bounded by the client's read timeout
    async fn open_stream(&self, request: TransportRequest) -> NetworkResult<StreamResponse> {
        let timeout = request.timeout;
        let response = self.execute(request, false).await?;
        let status = response.status().as_u16();
        let headers = response_headers(&response);

        let body = stream::unfold(Some(response), move |state| async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(bytes)) => Some((Ok(bytes.to_vec()), Some(response))),
                Ok(None) => None,
                Err(err) => Some((Err(transport_error(err, timeout)), None)),
            }
        })
        .boxed();

        Ok(StreamResponse { status, headers, body })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

/// Non-UTF-8 header values are dropped
fn response_headers(response: &Response) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.append(name.as_str(), value);
        }
    }
    headers
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    connect_timeout: Duration,
    read_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    user_agent: Option<String>,
    accept_invalid_certs: bool,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 6,
            user_agent: None,
            accept_invalid_certs: false,
        }
    }
}

impl ReqwestTransportBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Longest wait for the next piece of a response body
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Test-only helper to allow insecure TLS (e.g., self-signed certs).
    #[cfg(test)]
    pub fn accept_invalid_certs(mut self, enabled: bool) -> Self {
        self.accept_invalid_certs = enabled;
        self
    }

    pub fn build(self) -> NetworkResult<ReqwestTransport> {
        let mut builder = ReqwestClient::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|err| NetworkError::from(InfraError::from(err)))?;
        Ok(ReqwestTransport { client })
    }
}
