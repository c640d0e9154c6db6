//! `NetworkCore` facade
//!
//! Owns the pipeline and its collaborators, applies configuration, and runs
//! the background maintenance tasks. Construct one per application and share
//! it; there is no global instance.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use netweave_common::cache::CacheStats;
use netweave_common::resilience::{
    BackoffStrategy, CircuitBreakerMetrics, CircuitState, SharedClock, SystemClock,
};
use netweave_domain::constants::HEADER_CONTENT_TYPE;
use netweave_domain::{
    CachePolicy, HttpMethod, NetworkError, NetworkResult, NetworkingConfiguration, Priority,
    Request, RequestBuilder, RequestError, RequestResult, Response, SecurityLevel,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::balancer::LoadBalancer;
use crate::breaker::BreakerRegistry;
use crate::cache::ResponseCache;
use crate::compression::{AdaptiveSelector, AlgorithmSelector, CompressionCodec};
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::monitor::{NetworkHealth, NetworkMetrics, PerformanceMonitor, DEFAULT_HEALTH_WINDOW};
use crate::pipeline::{PipelineComponents, RequestPipeline, TransferProgress};
use crate::pool::{ConnectionPool, HostPoolStats};
use crate::ports::{AnalyticsSink, ByteStream, HealthProbe, NoopAnalytics, SecurityProvider, Transport};
use crate::scheduler::PriorityScheduler;
use crate::security::PolicySecurityProvider;

/// Builder for [`NetworkCore`]
pub struct NetworkCoreBuilder {
    transport: Arc<dyn Transport>,
    configuration: NetworkingConfiguration,
    security: Option<Arc<dyn SecurityProvider>>,
    analytics: Arc<dyn AnalyticsSink>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    clock: SharedClock,
    selector: Option<Arc<dyn AlgorithmSelector>>,
    health_window: usize,
}

impl NetworkCoreBuilder {
    pub fn configuration(mut self, configuration: NetworkingConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Defaults to [`PolicySecurityProvider`] driven by the `security` section
    pub fn security(mut self, security: Arc<dyn SecurityProvider>) -> Self {
        self.security = Some(security);
        self
    }

    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    /// Enables periodic server health checks once started
    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    /// Time source for breakers, cache expiry and pool keep-alive
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to [`AdaptiveSelector`] over the core's own monitor
    pub fn compression_selector(mut self, selector: Arc<dyn AlgorithmSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Outcomes the health assessment looks back over
    pub fn health_window(mut self, window: usize) -> Self {
        self.health_window = window;
        self
    }

    pub fn build(self) -> NetworkResult<NetworkCore> {
        let config = self.configuration;
        config.validate()?;
        check_transport_security(&config)?;

        let monitor = Arc::new(PerformanceMonitor::new(self.health_window));
        let security = self
            .security
            .unwrap_or_else(|| Arc::new(PolicySecurityProvider::new(config.security.clone())));
        security.configure(&config.security);
        let selector = self
            .selector
            .unwrap_or_else(|| Arc::new(AdaptiveSelector::new(Arc::clone(&monitor))));

        let parts = PipelineComponents {
            transport: self.transport,
            security,
            analytics: self.analytics,
            interceptors: Arc::new(InterceptorChain::new()),
            breakers: Arc::new(BreakerRegistry::with_clock(&config.circuit_breaker, Arc::clone(&self.clock))?),
            cache: Arc::new(ResponseCache::with_clock(config.cache_policy.clone(), Arc::clone(&self.clock))),
            balancer: Arc::new(LoadBalancer::from_config(&config.load_balancing, config.base_endpoint.as_deref())),
            pool: Arc::new(ConnectionPool::with_clock(config.connection_pool.clone(), self.clock)),
            codec: Arc::new(CompressionCodec::new(config.compression.clone(), selector)),
            monitor,
        };
        let pipeline = Arc::new(RequestPipeline::new(&config, parts)?);
        let scheduler = Arc::new(PriorityScheduler::new(Arc::clone(&pipeline), config.max_concurrent_requests));

        info!(
            base_endpoint = config.base_endpoint.as_deref().unwrap_or("-"),
            servers = config.load_balancing.servers.len(),
            "network core ready"
        );
        Ok(NetworkCore {
            pipeline,
            scheduler,
            configuration: RwLock::new(config),
            health_probe: self.health_probe,
            background: Mutex::new(None),
        })
    }
}

struct Background {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Entry point for callers: request helpers, batch and transfer operations,
/// configuration and introspection
pub struct NetworkCore {
    pipeline: Arc<RequestPipeline>,
    scheduler: Arc<PriorityScheduler>,
    configuration: RwLock<NetworkingConfiguration>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    background: Mutex<Option<Background>>,
}

impl NetworkCore {
    pub fn builder(transport: Arc<dyn Transport>) -> NetworkCoreBuilder {
        NetworkCoreBuilder {
            transport,
            configuration: NetworkingConfiguration::default(),
            security: None,
            analytics: Arc::new(NoopAnalytics),
            health_probe: None,
            clock: Arc::new(SystemClock),
            selector: None,
            health_window: DEFAULT_HEALTH_WINDOW,
        }
    }

    fn parts(&self) -> &PipelineComponents {
        self.pipeline.components()
    }

    /* ---------------------------------------------------------------------- */
    /* Requests */
    /* ---------------------------------------------------------------------- */

    pub fn get(&self, endpoint: impl Into<String>) -> CallBuilder<'_> {
        CallBuilder::new(self, HttpMethod::Get, endpoint.into())
    }

    pub fn post(&self, endpoint: impl Into<String>) -> CallBuilder<'_> {
        CallBuilder::new(self, HttpMethod::Post, endpoint.into())
    }

    pub fn put(&self, endpoint: impl Into<String>) -> CallBuilder<'_> {
        CallBuilder::new(self, HttpMethod::Put, endpoint.into())
    }

    pub fn delete(&self, endpoint: impl Into<String>) -> CallBuilder<'_> {
        CallBuilder::new(self, HttpMethod::Delete, endpoint.into())
    }

    pub fn patch(&self, endpoint: impl Into<String>) -> CallBuilder<'_> {
        CallBuilder::new(self, HttpMethod::Patch, endpoint.into())
    }

    pub async fn execute(&self, request: Request) -> RequestResult<Response> {
        self.pipeline.execute(request, &CancellationToken::new()).await
    }

    pub async fn execute_with_cancellation(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> RequestResult<Response> {
        self.pipeline.execute(request, cancel).await
    }

    /// Run `requests` with at most `max_concurrency` in flight. Results come
    /// back in input order; one failure does not affect the others.
    ///
    /// Everything runs inside the returned future: dropping it cancels the
    /// requests still in flight and never starts the rest.
    pub async fn batch(&self, requests: Vec<Request>, max_concurrency: usize) -> Vec<RequestResult<Response>> {
        debug!(requests = requests.len(), max_concurrency, "batch dispatched");
        let cancel = CancellationToken::new();
        stream::iter(requests)
            .map(|request| self.pipeline.execute(request, &cancel))
            .buffered(max_concurrency.max(1))
            .collect()
            .await
    }

    /// Queue a request for priority dispatch. Needs [`start`](Self::start).
    pub async fn submit(&self, request: Request) -> RequestResult<Response> {
        self.scheduler.submit(request, CancellationToken::new()).await
    }

    pub async fn submit_with_cancellation(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> RequestResult<Response> {
        self.scheduler.submit(request, cancel).await
    }

    /* ---------------------------------------------------------------------- */
    /* Transfers */
    /* ---------------------------------------------------------------------- */

    /// Lazy, single-use stream of the body at `endpoint`
    pub fn stream_download(&self, endpoint: impl Into<String>, chunk_size: usize) -> ByteStream {
        self.stream_download_with_cancellation(endpoint, chunk_size, CancellationToken::new())
    }

    pub fn stream_download_with_cancellation(
        &self,
        endpoint: impl Into<String>,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> ByteStream {
        self.pipeline.stream(Request::new(HttpMethod::Get, endpoint), chunk_size, cancel)
    }

    /// POST the file at `path` to `endpoint`
    pub async fn upload_file(
        &self,
        endpoint: impl Into<String>,
        path: impl AsRef<Path>,
        progress: impl FnMut(TransferProgress) + Send,
    ) -> RequestResult<Response> {
        let request = Request::new(HttpMethod::Post, endpoint);
        self.pipeline.upload_file(request, path.as_ref(), progress, &CancellationToken::new()).await
    }

    /// Save the body at `endpoint` to `path`, returning the bytes written
    pub async fn download_file(
        &self,
        endpoint: impl Into<String>,
        path: impl AsRef<Path>,
        progress: impl FnMut(TransferProgress) + Send,
    ) -> RequestResult<u64> {
        let request = Request::new(HttpMethod::Get, endpoint);
        self.pipeline.download_file(request, path.as_ref(), progress, &CancellationToken::new()).await
    }

    /* ---------------------------------------------------------------------- */
    /* Configuration */
    /* ---------------------------------------------------------------------- */

    pub fn configuration(&self) -> NetworkingConfiguration {
        self.configuration.read().clone()
    }

    /// Validate and apply a new configuration to every component. Running
    /// background tasks restart with the new intervals.
    pub async fn configure(&self, config: NetworkingConfiguration) -> NetworkResult<()> {
        config.validate()?;
        check_transport_security(&config)?;

        let parts = self.parts();
        parts.breakers.reconfigure(&config.circuit_breaker)?;
        self.pipeline.reconfigure(&config)?;
        parts.security.configure(&config.security);
        parts.cache.reconfigure(config.cache_policy.clone());
        parts.balancer.reconfigure(&config.load_balancing, config.base_endpoint.as_deref());
        parts.pool.reconfigure(config.connection_pool.clone());
        parts.codec.reconfigure(config.compression.clone());
        self.scheduler.set_max_concurrent(config.max_concurrent_requests);
        *self.configuration.write() = config;
        info!("configuration applied");

        if self.is_running() {
            self.stop_background().await;
            self.start()?;
        }
        Ok(())
    }

    /// Replace the configured retry backoff (`None` restores it)
    pub fn set_backoff(&self, backoff: Option<BackoffStrategy>) -> NetworkResult<()> {
        self.pipeline.set_backoff(backoff)
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.parts().interceptors.add(interceptor);
    }

    /// Remove by identity; `true` if it was registered
    pub fn remove_interceptor(&self, interceptor: &Arc<dyn Interceptor>) -> bool {
        self.parts().interceptors.remove(interceptor)
    }

    /* ---------------------------------------------------------------------- */
    /* Introspection */
    /* ---------------------------------------------------------------------- */

    pub fn circuit_breaker_status(&self, endpoint: &str) -> CircuitState {
        self.parts().breakers.state(endpoint)
    }

    pub fn circuit_breaker_metrics(&self, endpoint: &str) -> Option<CircuitBreakerMetrics> {
        self.parts().breakers.metrics(endpoint)
    }

    pub fn reset_circuit_breaker(&self, endpoint: &str) -> bool {
        self.parts().breakers.reset(endpoint)
    }

    /// Drop cached responses whose key matches `pattern`, or all of them
    pub fn clear_cache(&self, pattern: Option<&str>) -> usize {
        self.parts().cache.invalidate(pattern)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.parts().cache.stats()
    }

    pub fn connection_stats(&self, host: &str) -> Option<HostPoolStats> {
        self.parts().pool.stats(host)
    }

    pub fn metrics(&self) -> NetworkMetrics {
        self.parts().monitor.snapshot()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<NetworkMetrics> {
        self.parts().monitor.subscribe()
    }

    pub fn network_health(&self) -> NetworkHealth {
        self.parts().monitor.health()
    }

    pub fn load_balancer(&self) -> Arc<LoadBalancer> {
        Arc::clone(&self.parts().balancer)
    }

    /* ---------------------------------------------------------------------- */
    /* Lifecycle */
    /* ---------------------------------------------------------------------- */

    pub fn is_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Spawn the cache sweeper, pool reaper, health checker and priority
    /// dispatcher on the current tokio runtime
    pub fn start(&self) -> NetworkResult<()> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| NetworkError::Internal(format!("no tokio runtime: {e}")))?;

        let mut background = self.background.lock();
        if background.is_some() {
            debug!("background tasks already running");
            return Ok(());
        }

        let config = self.configuration();
        let parts = self.parts();
        let shutdown = CancellationToken::new();
        let mut handles = vec![
            parts.cache.spawn_sweeper(shutdown.child_token()),
            parts.pool.spawn_reaper(reaper_interval(&config), shutdown.child_token()),
            self.scheduler.spawn_dispatcher(shutdown.child_token()),
        ];
        match &self.health_probe {
            Some(probe) => handles.push(parts.balancer.spawn_health_checker(
                Arc::clone(probe),
                &config.load_balancing,
                Arc::clone(&parts.analytics),
                shutdown.child_token(),
            )),
            None => debug!("no health probe configured, server health checks disabled"),
        }

        info!(tasks = handles.len(), "background tasks started");
        *background = Some(Background { shutdown, handles });
        Ok(())
    }

    async fn stop_background(&self) {
        let background = self.background.lock().take();
        let Some(background) = background else {
            return;
        };
        background.shutdown.cancel();
        for handle in background.handles {
            if let Err(error) = handle.await {
                warn!(%error, "background task ended abnormally");
            }
        }
    }

    /// Stop background tasks and fail requests still waiting in the
    /// priority queue
    pub async fn shutdown(&self) {
        self.stop_background().await;
        let cancelled = self.scheduler.cancel_pending();
        info!(cancelled, "network core shut down");
    }
}

impl std::fmt::Debug for NetworkCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkCore")
            .field("pipeline", &self.pipeline)
            .field("scheduler", &self.scheduler)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Idle connections are checked at half the keep-alive timeout
fn reaper_interval(config: &NetworkingConfiguration) -> Duration {
    (config.connection_pool.keep_alive_timeout / 2).max(Duration::from_millis(100))
}

/// Under `Strict` security every configured origin must be https
fn check_transport_security(config: &NetworkingConfiguration) -> NetworkResult<()> {
    if config.security.level != SecurityLevel::Strict {
        return Ok(());
    }
    let origins = config
        .base_endpoint
        .iter()
        .map(String::as_str)
        .chain(config.load_balancing.servers.iter().map(|s| s.endpoint.as_str()));
    for origin in origins {
        let secure = Url::parse(origin).map(|url| url.scheme() == "https").unwrap_or(false);
        if !secure {
            return Err(NetworkError::Security(format!("{origin} is not https")));
        }
    }
    Ok(())
}

/// Fluent request builder returned by the method helpers on [`NetworkCore`]
pub struct CallBuilder<'a> {
    core: &'a NetworkCore,
    method: HttpMethod,
    endpoint: String,
    builder: RequestBuilder,
    error: Option<NetworkError>,
}

impl<'a> CallBuilder<'a> {
    fn new(core: &'a NetworkCore, method: HttpMethod, endpoint: String) -> Self {
        let builder = Request::builder(method, endpoint.clone());
        Self { core, method, endpoint, builder, error: None }
    }

    fn map(mut self, f: impl FnOnce(RequestBuilder) -> RequestBuilder) -> Self {
        self.builder = f(self.builder);
        self
    }

    pub fn query(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.map(|b| b.query(name, value))
    }

    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.map(|b| b.header(name, value))
    }

    /// JSON body; a serialization failure is reported by `send`
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => self.map(|b| b.header(HEADER_CONTENT_TYPE, "application/json").body(body)),
            Err(e) => {
                self.error = Some(NetworkError::Encoding(e.to_string()));
                self
            }
        }
    }

    pub fn body(self, body: impl Into<Vec<u8>>) -> Self {
        self.map(|b| b.body(body))
    }

    pub fn cache_policy(self, policy: CachePolicy) -> Self {
        self.map(|b| b.cache_policy(policy))
    }

    pub fn priority(self, priority: Priority) -> Self {
        self.map(|b| b.priority(priority))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.map(|b| b.timeout(timeout))
    }

    pub fn base_override(self, base: impl Into<String>) -> Self {
        self.map(|b| b.base_override(base))
    }

    pub fn build(self) -> NetworkResult<Request> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.builder.build()),
        }
    }

    pub async fn send(self) -> RequestResult<Response> {
        self.send_with_cancellation(&CancellationToken::new()).await
    }

    pub async fn send_with_cancellation(self, cancel: &CancellationToken) -> RequestResult<Response> {
        let core = self.core;
        let request = self.into_request()?;
        core.execute_with_cancellation(request, cancel).await
    }

    /// Send through the priority queue
    pub async fn submit(self) -> RequestResult<Response> {
        let core = self.core;
        let request = self.into_request()?;
        core.submit(request).await
    }

    fn into_request(self) -> RequestResult<Request> {
        let (method, endpoint) = (self.method, self.endpoint.clone());
        self.build().map_err(|error| RequestError::new(method, endpoint, 0, error))
    }
}
