//! Request pipeline
//!
//! One request flows through:
//!
//! 1. interceptors, in registration order
//! 2. security validation
//! 3. the endpoint's circuit breaker
//! 4. the response cache (cacheable methods only)
//! 5. server selection, body compression and encryption
//! 6. retried transport attempts, each with its own deadline and pooled
//!    connection
//! 7. breaker, cache, monitor and analytics bookkeeping
//!
//! Cancellation is checked before anything else and raced against the whole
//! run, so a cancelled request never reaches the transport after the token
//! fires.

mod transfer;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use netweave_common::resilience::{BackoffStrategy, CircuitState};
use netweave_domain::constants::{
    HEADER_ACCEPT_ENCODING, HEADER_CONTENT_ENCODING, HEADER_REQUEST_ID,
};
use netweave_domain::{
    EventMetadata, Headers, HttpMethod, NetworkError, NetworkEvent, NetworkResult,
    NetworkingConfiguration, Request, RequestError, RequestResult, Response, RetryPolicyConfig,
};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use transfer::TransferProgress;

use crate::balancer::{LoadBalancer, ServerDescriptor};
use crate::breaker::{open_circuit_error, BreakerRegistry};
use crate::cache::{CachedResponse, ResponseCache};
use crate::compression::CompressionCodec;
use crate::interceptor::InterceptorChain;
use crate::monitor::PerformanceMonitor;
use crate::pool::ConnectionPool;
use crate::ports::{AnalyticsSink, SecurityProvider, Transport, TransportRequest, TransportResponse};
use crate::retry::{build_executor, into_network_error, NetworkRetryExecutor};

/// Collaborators the pipeline drives. Shared with the facade so it can
/// expose their state.
#[derive(Clone)]
pub struct PipelineComponents {
    pub transport: Arc<dyn Transport>,
    pub security: Arc<dyn SecurityProvider>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub interceptors: Arc<InterceptorChain>,
    pub breakers: Arc<BreakerRegistry>,
    pub cache: Arc<ResponseCache>,
    pub balancer: Arc<LoadBalancer>,
    pub pool: Arc<ConnectionPool>,
    pub codec: Arc<CompressionCodec>,
    pub monitor: Arc<PerformanceMonitor>,
}

struct RetryState {
    config: RetryPolicyConfig,
    custom_backoff: Option<BackoffStrategy>,
    executor: Arc<NetworkRetryExecutor>,
}

/// Everything an attempt needs, computed once per request
struct Outgoing {
    url: Url,
    host: String,
    headers: Headers,
    body: Option<Vec<u8>>,
    timeout: Duration,
    server: Option<Arc<ServerDescriptor>>,
}

impl Outgoing {
    fn transport_request(&self, request: &Request, connection_id: u64, timeout: Duration) -> TransportRequest {
        TransportRequest {
            request_id: request.id(),
            method: request.method(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout,
            connection_id,
        }
    }

    fn bytes_sent(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }
}

/// Executes requests against the configured transport
pub struct RequestPipeline {
    parts: PipelineComponents,
    timeout: RwLock<Duration>,
    retry: RwLock<RetryState>,
}

impl RequestPipeline {
    pub fn new(config: &NetworkingConfiguration, parts: PipelineComponents) -> NetworkResult<Self> {
        let executor = build_executor(&config.retry_policy, None)?;
        Ok(Self {
            parts,
            timeout: RwLock::new(config.timeout),
            retry: RwLock::new(RetryState {
                config: config.retry_policy.clone(),
                custom_backoff: None,
                executor: Arc::new(executor),
            }),
        })
    }

    pub fn components(&self) -> &PipelineComponents {
        &self.parts
    }

    /// Apply the pipeline-level parts of a new configuration. A custom
    /// backoff installed with [`set_backoff`](Self::set_backoff) survives.
    pub fn reconfigure(&self, config: &NetworkingConfiguration) -> NetworkResult<()> {
        let mut retry = self.retry.write();
        let executor = build_executor(&config.retry_policy, retry.custom_backoff.clone())?;
        retry.config = config.retry_policy.clone();
        retry.executor = Arc::new(executor);
        *self.timeout.write() = config.timeout;
        Ok(())
    }

    /// Replace the configured backoff; `None` restores it
    pub fn set_backoff(&self, backoff: Option<BackoffStrategy>) -> NetworkResult<()> {
        let mut retry = self.retry.write();
        let executor = build_executor(&retry.config, backoff.clone())?;
        retry.custom_backoff = backoff;
        retry.executor = Arc::new(executor);
        Ok(())
    }

    fn executor(&self) -> Arc<NetworkRetryExecutor> {
        Arc::clone(&self.retry.read().executor)
    }

    fn timeout_for(&self, request: &Request) -> Duration {
        request.timeout().unwrap_or_else(|| *self.timeout.read())
    }

    /// Run a request to completion, or until `cancel` fires
    #[instrument(
        name = "request",
        skip_all,
        fields(request_id = %request.id(), method = %request.method(), endpoint = %request.endpoint())
    )]
    pub async fn execute(&self, request: Request, cancel: &CancellationToken) -> RequestResult<Response> {
        let method = request.method();
        let endpoint = request.endpoint().to_string();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let attempts = attempts.load(Ordering::Relaxed);
                Err(self.fail(method, &endpoint, attempts, NetworkError::Cancelled, started))
            }
            result = self.run(request, &attempts, started) => result,
        }
    }

    async fn run(&self, request: Request, attempts: &AtomicU32, started: Instant) -> RequestResult<Response> {
        let request = self.parts.interceptors.process(request);
        let method = request.method();
        let endpoint = request.endpoint().to_string();
        self.parts.analytics.track_event(
            NetworkEvent::RequestStarted,
            EventMetadata::new()
                .with("request_id", request.id())
                .with("method", method)
                .with("endpoint", &endpoint)
                .with("priority", request.priority()),
        );

        if let Err(error) = self.parts.security.validate(&request).await {
            return Err(self.fail(method, &endpoint, 0, error, started));
        }

        let breaker = match self.parts.breakers.get_or_create(&endpoint) {
            Ok(breaker) => breaker,
            Err(error) => return Err(self.fail(method, &endpoint, 0, error, started)),
        };
        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(rejection) => {
                let error = open_circuit_error(&endpoint, &rejection);
                return Err(self.fail(method, &endpoint, 0, error, started));
            }
        };

        let cache_key = (self.parts.cache.is_enabled() && method.is_cacheable())
            .then(|| self.parts.cache.key_for(&request));
        if let Some(key) = cache_key.as_deref().filter(|_| request.cache_policy().allows_read()) {
            match self.parts.cache.get(key) {
                Some(hit) => {
                    drop(permit);
                    self.parts.monitor.record_cache_hit(&endpoint);
                    self.parts.analytics.track_event(
                        NetworkEvent::CacheHit,
                        EventMetadata::new().with("request_id", request.id()).with("key", key),
                    );
                    debug!("served from cache");
                    let mut response = hit.into_response(request.id());
                    response.latency = started.elapsed();
                    return Ok(response);
                }
                None => {
                    self.parts.monitor.record_cache_miss();
                    self.parts.analytics.track_event(
                        NetworkEvent::CacheMiss,
                        EventMetadata::new().with("request_id", request.id()).with("key", key),
                    );
                }
            }
        }

        let timeout = self.timeout_for(&request);
        let outgoing = match self.prepare(&request, timeout, true).await {
            Ok(outgoing) => outgoing,
            Err(error) => return Err(self.fail(method, &endpoint, 0, error, started)),
        };

        let executor = self.executor();
        let (request_ref, outgoing_ref) = (&request, &outgoing);
        let result = executor
            .execute_observed(
                move |attempt| {
                    attempts.store(attempt + 1, Ordering::Relaxed);
                    self.attempt(request_ref, outgoing_ref)
                },
                |error, attempt, delay| {
                    self.parts.monitor.record_retry();
                    self.parts.analytics.track_event(
                        NetworkEvent::RetryScheduled,
                        EventMetadata::new()
                            .with("request_id", request_ref.id())
                            .with("endpoint", &endpoint)
                            .with("attempt", attempt + 1)
                            .with("delay_ms", delay.as_millis())
                            .with("error", error),
                    );
                },
            )
            .await;

        match result {
            Ok(raw) => {
                permit.success();
                let made = attempts.load(Ordering::Relaxed);
                let latency = started.elapsed();

                if let Some(key) = cache_key.filter(|_| request.cache_policy().allows_write()) {
                    let cached = CachedResponse {
                        status: raw.status,
                        headers: raw.headers.clone(),
                        body: raw.body.clone(),
                    };
                    self.parts.cache.put(key, cached, request.cache_policy().ttl());
                }

                self.parts.monitor.record_success(
                    &endpoint,
                    latency,
                    outgoing.bytes_sent(),
                    raw.body.len() as u64,
                );
                let server_id = outgoing.server.as_ref().map(|s| s.id().to_string());
                self.parts.analytics.track_event(
                    NetworkEvent::RequestCompleted,
                    EventMetadata::new()
                        .with("request_id", request.id())
                        .with("endpoint", &endpoint)
                        .with("status", raw.status)
                        .with("attempts", made)
                        .with("latency_ms", latency.as_millis())
                        .with("server", server_id.as_deref().unwrap_or("-")),
                );
                info!(status = raw.status, attempts = made, latency_ms = latency.as_millis() as u64, "request completed");

                Ok(Response {
                    status: raw.status,
                    headers: raw.headers,
                    body: raw.body,
                    from_cache: false,
                    request_id: request.id(),
                    server_id,
                    latency,
                    attempts: made,
                })
            }
            Err(retry_error) => {
                let made = retry_error.attempts();
                let error = into_network_error(retry_error);
                if error.counts_against_endpoint() {
                    permit.failure();
                    if breaker.state() == CircuitState::Open {
                        warn!("circuit opened");
                        self.parts.analytics.track_event(
                            NetworkEvent::CircuitOpened,
                            EventMetadata::new().with("endpoint", &endpoint).with("error", &error),
                        );
                    }
                }
                Err(self.fail(method, &endpoint, made, error, started))
            }
        }
    }

    /// Pick the server and encode the body. `negotiate` advertises the
    /// supported response encodings; streams ask for identity.
    async fn prepare(&self, request: &Request, timeout: Duration, negotiate: bool) -> NetworkResult<Outgoing> {
        let balanced = request.base_override().is_none()
            && !request.is_absolute()
            && !self.parts.balancer.is_empty();
        let server = if balanced { Some(self.parts.balancer.select()?) } else { None };
        let url = request.resolve_url(server.as_ref().map(|s| s.endpoint()))?;
        let host = url.origin().ascii_serialization();

        let mut headers = request.headers().clone();
        headers.insert_if_absent(HEADER_REQUEST_ID, request.id().to_string());
        if negotiate {
            headers.insert_if_absent(HEADER_ACCEPT_ENCODING, self.parts.codec.accept_encoding());
        } else {
            headers.insert(HEADER_ACCEPT_ENCODING, "identity");
        }

        let body = match request.body() {
            Some(body) => {
                let encoded = self.parts.codec.compress(body)?;
                if let Some(algorithm) = encoded.encoding {
                    headers.insert(HEADER_CONTENT_ENCODING, algorithm.content_encoding());
                }
                Some(self.parts.security.encrypt(request, encoded.bytes).await?)
            }
            None => None,
        };

        Ok(Outgoing { url, host, headers, body, timeout, server })
    }

    /// One transport exchange bounded by the attempt deadline
    async fn attempt(&self, request: &Request, outgoing: &Outgoing) -> NetworkResult<TransportResponse> {
        let deadline = tokio::time::Instant::now() + outgoing.timeout;
        let connection = self.parts.pool.acquire(&outgoing.host, outgoing.timeout).await?;
        let _lease = outgoing.server.as_ref().map(|server| server.lease());

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let exchange = self
            .parts
            .transport
            .send(outgoing.transport_request(request, connection.id(), remaining));
        let response = match tokio::time::timeout_at(deadline, exchange).await {
            Ok(Ok(response)) => {
                if let Err(error) = self.parts.pool.release(connection) {
                    debug!(%error, "connection not returned to pool");
                }
                response
            }
            Ok(Err(error)) => return Err(error),
            Err(_) => return Err(NetworkError::Timeout(outgoing.timeout)),
        };

        let TransportResponse { status, mut headers, body } = response;
        let body = self.parts.security.decrypt(request, body).await?;
        let body = self.parts.codec.decode_response(&mut headers, body)?;
        if !(200..300).contains(&status) {
            return Err(NetworkError::Http { status, body });
        }
        Ok(TransportResponse { status, headers, body })
    }

    /// Record a terminal failure and wrap it for the caller
    fn fail(
        &self,
        method: HttpMethod,
        endpoint: &str,
        attempts: u32,
        error: NetworkError,
        started: Instant,
    ) -> RequestError {
        self.parts.monitor.record_failure(endpoint, started.elapsed(), &error);
        if error.is_cancelled() {
            debug!(attempts, "request cancelled");
        } else {
            warn!(attempts, %error, "request failed");
        }
        self.parts.analytics.track_event(
            NetworkEvent::RequestFailed,
            EventMetadata::new()
                .with("method", method)
                .with("endpoint", endpoint)
                .with("attempts", attempts)
                .with("failure_class", error.failure_class())
                .with("error", &error),
        );
        RequestError::new(method, endpoint, attempts, error)
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("timeout", &*self.timeout.read())
            .field("retry", &self.retry.read().config)
            .finish_non_exhaustive()
    }
}
