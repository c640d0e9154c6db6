//! Server selection across upstream servers
//!
//! Selection only considers servers whose health flag is set. Health is
//! maintained by a background checker built on a [`HealthProbe`], or set
//! directly with [`LoadBalancer::set_health`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use netweave_domain::{
    EventMetadata, LoadBalancingConfig, LoadBalancingStrategy, NetworkError, NetworkEvent,
    NetworkResult, ServerConfig,
};
use parking_lot::RwLock;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::ports::{AnalyticsSink, HealthProbe};

/// Id given to the server synthesized from `baseEndpoint`
pub const DEFAULT_SERVER_ID: &str = "default";

/// An upstream server and its live counters
#[derive(Debug)]
pub struct ServerDescriptor {
    id: String,
    endpoint: String,
    weight: u32,
    distance: f64,
    active: AtomicUsize,
    healthy: AtomicBool,
}

impl ServerDescriptor {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            id: config.id.clone(),
            endpoint: config.endpoint.clone(),
            weight: config.weight.max(1),
            distance: config.distance,
            active: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Base URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Count one in-flight exchange until the lease drops
    pub fn lease(self: &Arc<Self>) -> ServerLease {
        self.active.fetch_add(1, Ordering::AcqRel);
        ServerLease { server: Arc::clone(self) }
    }
}

/// Active-connection accounting for one exchange
#[derive(Debug)]
pub struct ServerLease {
    server: Arc<ServerDescriptor>,
}

impl ServerLease {
    pub fn server(&self) -> &Arc<ServerDescriptor> {
        &self.server
    }
}

impl Drop for ServerLease {
    fn drop(&mut self) {
        self.server.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Picks a server per request
pub struct LoadBalancer {
    servers: RwLock<Vec<Arc<ServerDescriptor>>>,
    strategy: RwLock<LoadBalancingStrategy>,
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self { servers: RwLock::new(Vec::new()), strategy: RwLock::new(strategy), cursor: AtomicUsize::new(0) }
    }

    /// Balancer for a configuration; `base_endpoint` becomes the only server
    /// when none are listed
    pub fn from_config(config: &LoadBalancingConfig, base_endpoint: Option<&str>) -> Self {
        let balancer = Self::new(config.strategy);
        balancer.replace_servers(server_list(config, base_endpoint));
        balancer
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        *self.strategy.read()
    }

    pub fn set_strategy(&self, strategy: LoadBalancingStrategy) {
        *self.strategy.write() = strategy;
    }

    pub fn servers(&self) -> Vec<Arc<ServerDescriptor>> {
        self.servers.read().clone()
    }

    pub fn server(&self, id: &str) -> Option<Arc<ServerDescriptor>> {
        self.servers.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }

    /// Add or replace (by id) a server
    pub fn add_server(&self, config: &ServerConfig) {
        let server = Arc::new(ServerDescriptor::new(config));
        let mut servers = self.servers.write();
        match servers.iter_mut().find(|s| s.id == config.id) {
            Some(existing) => *existing = server,
            None => servers.push(server),
        }
        info!(server = %config.id, endpoint = %config.endpoint, "server added");
    }

    /// Returns whether a server with that id was present
    pub fn remove_server(&self, id: &str) -> bool {
        let mut servers = self.servers.write();
        let before = servers.len();
        servers.retain(|s| s.id != id);
        let removed = servers.len() != before;
        if removed {
            info!(server = id, "server removed");
        }
        removed
    }

    /// Apply a new configuration. Servers whose id and settings are unchanged
    /// keep their counters and health.
    pub fn reconfigure(&self, config: &LoadBalancingConfig, base_endpoint: Option<&str>) {
        self.set_strategy(config.strategy);
        self.replace_servers(server_list(config, base_endpoint));
    }

    fn replace_servers(&self, configs: Vec<ServerConfig>) {
        let mut servers = self.servers.write();
        let next = configs
            .iter()
            .map(|config| {
                servers
                    .iter()
                    .find(|s| {
                        s.id == config.id
                            && s.endpoint == config.endpoint
                            && s.weight == config.weight.max(1)
                            && s.distance == config.distance
                    })
                    .cloned()
                    .unwrap_or_else(|| Arc::new(ServerDescriptor::new(config)))
            })
            .collect();
        *servers = next;
    }

    /// Set a server's health flag. Returns the previous value, or `None`
    /// for an unknown id.
    pub fn set_health(&self, id: &str, healthy: bool) -> Option<bool> {
        let server = self.server(id)?;
        let previous = server.healthy.swap(healthy, Ordering::AcqRel);
        if previous != healthy {
            if healthy {
                info!(server = id, "server healthy again");
            } else {
                warn!(server = id, "server marked unhealthy");
            }
        }
        Some(previous)
    }

    /// Pick with the configured strategy
    pub fn select(&self) -> NetworkResult<Arc<ServerDescriptor>> {
        self.select_with(self.strategy())
    }

    /// Pick with an explicit strategy
    pub fn select_with(&self, strategy: LoadBalancingStrategy) -> NetworkResult<Arc<ServerDescriptor>> {
        let healthy: Vec<Arc<ServerDescriptor>> =
            self.servers.read().iter().filter(|s| s.is_healthy()).cloned().collect();
        if healthy.is_empty() {
            return Err(NetworkError::NoServerAvailable);
        }

        let chosen = match strategy {
            LoadBalancingStrategy::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
                &healthy[index]
            }
            LoadBalancingStrategy::LeastConnections => healthy
                .iter()
                .min_by_key(|s| s.active_connections())
                .unwrap_or(&healthy[0]),
            LoadBalancingStrategy::Weighted => {
                let total: u64 = healthy.iter().map(|s| u64::from(s.weight)).sum();
                let mut ticket = rand::thread_rng().gen_range(0..total);
                healthy
                    .iter()
                    .find(|s| {
                        let weight = u64::from(s.weight);
                        if ticket < weight {
                            true
                        } else {
                            ticket -= weight;
                            false
                        }
                    })
                    .unwrap_or(&healthy[0])
            }
            LoadBalancingStrategy::Geographic => healthy
                .iter()
                .min_by(|a, b| a.distance.total_cmp(&b.distance))
                .unwrap_or(&healthy[0]),
        };
        debug!(server = %chosen.id, ?strategy, "server selected");
        Ok(Arc::clone(chosen))
    }

    /// Probe every server once and update health flags
    pub async fn run_health_checks(
        &self,
        probe: &dyn HealthProbe,
        path: &str,
        analytics: &dyn AnalyticsSink,
    ) -> usize {
        let mut changed = 0;
        for server in self.servers() {
            let healthy = match health_url(server.endpoint(), path) {
                Ok(url) => probe.probe(&url).await,
                Err(err) => {
                    warn!(server = %server.id, error = %err, "cannot build health check URL");
                    false
                }
            };
            if self.set_health(&server.id, healthy).is_some_and(|previous| previous != healthy) {
                changed += 1;
                analytics.track_event(
                    NetworkEvent::ServerHealthChanged,
                    EventMetadata::new().with("server", &server.id).with("healthy", healthy),
                );
            }
        }
        changed
    }

    /// Run health checks every `interval` until `shutdown` fires
    pub fn spawn_health_checker(
        self: &Arc<Self>,
        probe: Arc<dyn HealthProbe>,
        config: &LoadBalancingConfig,
        analytics: Arc<dyn AnalyticsSink>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let balancer = Arc::clone(self);
        let interval = config.health_check_interval;
        let path = config.health_check_path.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        balancer.run_health_checks(probe.as_ref(), &path, analytics.as_ref()).await;
                    }
                }
            }
        })
    }
}

impl fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategy", &self.strategy())
            .field("servers", &self.servers.read().len())
            .finish()
    }
}

fn server_list(config: &LoadBalancingConfig, base_endpoint: Option<&str>) -> Vec<ServerConfig> {
    match (config.servers.is_empty(), base_endpoint) {
        (true, Some(base)) => vec![ServerConfig::new(DEFAULT_SERVER_ID, base)],
        _ => config.servers.clone(),
    }
}

fn health_url(endpoint: &str, path: &str) -> NetworkResult<Url> {
    let mut base = Url::parse(endpoint)?;
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}
