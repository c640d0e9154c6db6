//! Networking configuration
//!
//! Keys are camelCase and durations are integer milliseconds so the same
//! document can be written as JSON or TOML. Every section has defaults;
//! a file only needs the values it changes.

use std::time::Duration;

use netweave_common::compression::CompressionAlgorithm;
use netweave_common::impl_token_conversions;
use netweave_common::utils::serde::duration_millis;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::*;
use crate::errors::{FailureClass, NetworkError, NetworkResult};

/// Top-level configuration for a networking core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkingConfiguration {
    /// Base URL relative endpoints resolve against when no servers are
    /// configured for load balancing
    pub base_endpoint: Option<String>,

    /// Per-attempt deadline unless the request sets its own
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    pub retry_policy: RetryPolicyConfig,
    pub cache_policy: CachePolicyConfig,
    pub compression: CompressionConfig,
    pub security: SecurityConfig,
    pub load_balancing: LoadBalancingConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub connection_pool: ConnectionPoolConfig,

    /// Workers draining the priority queue
    pub max_concurrent_requests: usize,
}

impl Default for NetworkingConfiguration {
    fn default() -> Self {
        Self {
            base_endpoint: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry_policy: RetryPolicyConfig::default(),
            cache_policy: CachePolicyConfig::default(),
            compression: CompressionConfig::default(),
            security: SecurityConfig::default(),
            load_balancing: LoadBalancingConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            connection_pool: ConnectionPoolConfig::default(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl NetworkingConfiguration {
    /// Defaults with a base endpoint
    pub fn with_base_endpoint(base: impl Into<String>) -> Self {
        Self { base_endpoint: Some(base.into()), ..Self::default() }
    }

    /// Check every section, reporting the first problem as
    /// [`NetworkError::Config`]
    pub fn validate(&self) -> NetworkResult<()> {
        if let Some(base) = &self.base_endpoint {
            parse_http_url("baseEndpoint", base)?;
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout", "must be greater than 0"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(invalid("maxConcurrentRequests", "must be at least 1"));
        }

        self.retry_policy.validate()?;
        self.cache_policy.validate()?;
        self.compression.validate()?;
        self.load_balancing.validate()?;
        self.circuit_breaker.validate()?;
        self.connection_pool.validate()
    }
}

fn invalid(field: &str, message: &str) -> NetworkError {
    NetworkError::Config(format!("{field}: {message}"))
}

fn parse_http_url(field: &str, value: &str) -> NetworkResult<Url> {
    let url = Url::parse(value).map_err(|e| invalid(field, &e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(field, "must be an http or https URL"));
    }
    Ok(url)
}

/* -------------------------------------------------------------------------- */
/* Retry */
/* -------------------------------------------------------------------------- */

/// Backoff between retry attempts.
///
/// `Linear` waits `unit * attempt`, `Exponential` waits `unit * 2^attempt`
/// capped at `maxDelay`, with `attempt` counted from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BackoffSetting {
    #[serde(rename_all = "camelCase")]
    Fixed {
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    #[serde(rename_all = "camelCase")]
    Linear {
        #[serde(with = "duration_millis")]
        unit: Duration,
    },
    #[serde(rename_all = "camelCase")]
    Exponential {
        #[serde(with = "duration_millis")]
        unit: Duration,
        #[serde(with = "duration_millis")]
        max_delay: Duration,
    },
}

impl Default for BackoffSetting {
    fn default() -> Self {
        Self::Exponential {
            unit: Duration::from_millis(DEFAULT_BACKOFF_UNIT_MS),
            max_delay: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

/// Retry behaviour for transport attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicyConfig {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    pub backoff_strategy: BackoffSetting,
    /// Failure classes eligible for retry; errors must also be transient
    pub retryable_failures: Vec<FailureClass>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_strategy: BackoffSetting::default(),
            retryable_failures: FailureClass::DEFAULT_RETRYABLE.to_vec(),
        }
    }
}

impl RetryPolicyConfig {
    fn validate(&self) -> NetworkResult<()> {
        if self.max_attempts == 0 {
            return Err(invalid("retryPolicy.maxAttempts", "must be at least 1"));
        }
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Cache */
/* -------------------------------------------------------------------------- */

/// Which cached response to drop when the cache is over budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheEviction {
    /// Oldest write first
    #[default]
    Fifo,
    Lru,
    Lfu,
    Random,
}

impl_token_conversions!(CacheEviction {
    Fifo => "fifo",
    Lru => "lru",
    Lfu => "lfu",
    Random => "random",
});

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CachePolicyConfig {
    pub enabled: bool,
    /// Budget in body bytes
    pub max_size: usize,
    pub max_entries: Option<usize>,
    #[serde(rename = "defaultTTL", alias = "defaultTtl", with = "duration_millis")]
    pub default_ttl: Duration,
    pub eviction: CacheEviction,
    /// Include a fingerprint of query parameters and body in the cache key
    pub key_includes_payload: bool,
    /// How often the background sweeper drops expired entries
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_CACHE_MAX_SIZE,
            max_entries: None,
            default_ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            eviction: CacheEviction::Fifo,
            key_includes_payload: true,
            sweep_interval: Duration::from_millis(DEFAULT_CACHE_SWEEP_INTERVAL_MS),
        }
    }
}

impl CachePolicyConfig {
    fn validate(&self) -> NetworkResult<()> {
        if self.enabled && self.max_size == 0 {
            return Err(invalid("cachePolicy.maxSize", "must be greater than 0"));
        }
        if self.max_entries == Some(0) {
            return Err(invalid("cachePolicy.maxEntries", "must be greater than 0"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("cachePolicy.sweepInterval", "must be greater than 0"));
        }
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Compression */
/* -------------------------------------------------------------------------- */

/// Request body compression settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Algorithms in order of preference
    pub algorithms: Vec<CompressionAlgorithm>,
    /// Bodies must be strictly larger than this to be compressed
    pub min_size_threshold: usize,
    /// flate2 level 0-9
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithms: vec![CompressionAlgorithm::Gzip, CompressionAlgorithm::Zlib],
            min_size_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl CompressionConfig {
    fn validate(&self) -> NetworkResult<()> {
        if self.level > 9 {
            return Err(invalid("compression.level", "must be between 0 and 9"));
        }
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Security */
/* -------------------------------------------------------------------------- */

/// How strictly outgoing requests are vetted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// No checks
    None,
    /// Reject malformed requests
    #[default]
    Standard,
    /// Additionally require https
    Strict,
}

impl_token_conversions!(SecurityLevel {
    None => "none",
    Standard => "standard",
    Strict => "strict",
});

/// Settings handed to the security provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    pub level: SecurityLevel,
    /// Pinned certificate fingerprints, enforced by transports that support
    /// pinning
    pub certificate_pins: Vec<String>,
}

/* -------------------------------------------------------------------------- */
/* Load balancing */
/* -------------------------------------------------------------------------- */

/// Server selection rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    /// Random choice proportional to weight
    Weighted,
    /// Smallest declared distance
    Geographic,
}

impl_token_conversions!(LoadBalancingStrategy {
    RoundRobin => "roundRobin",
    LeastConnections => "leastConnections",
    Weighted => "weighted",
    Geographic => "geographic",
});

/// One upstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: String,
    /// Base URL of the server
    pub endpoint: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Lower is closer
    #[serde(default)]
    pub distance: f64,
}

fn default_weight() -> u32 {
    1
}

impl ServerConfig {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self { id: id.into(), endpoint: endpoint.into(), weight: 1, distance: 0.0 }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = distance;
        self
    }
}

/// Load balancer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadBalancingConfig {
    pub strategy: LoadBalancingStrategy,
    #[serde(with = "duration_millis")]
    pub health_check_interval: Duration,
    /// Path probed on each server by the health checker
    pub health_check_path: String,
    pub servers: Vec<ServerConfig>,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            health_check_interval: Duration::from_millis(DEFAULT_HEALTH_CHECK_INTERVAL_MS),
            health_check_path: DEFAULT_HEALTH_CHECK_PATH.to_string(),
            servers: Vec::new(),
        }
    }
}

impl LoadBalancingConfig {
    fn validate(&self) -> NetworkResult<()> {
        if self.health_check_interval.is_zero() {
            return Err(invalid("loadBalancing.healthCheckInterval", "must be greater than 0"));
        }
        for server in &self.servers {
            parse_http_url("loadBalancing.servers.endpoint", &server.endpoint)?;
            if server.weight == 0 {
                return Err(invalid("loadBalancing.servers.weight", "must be greater than 0"));
            }
            if !server.distance.is_finite() || server.distance < 0.0 {
                return Err(invalid("loadBalancing.servers.distance", "must be a finite value >= 0"));
            }
        }
        let mut ids: Vec<&str> = self.servers.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(invalid("loadBalancing.servers.id", "server ids must be unique"));
        }
        Ok(())
    }
}

/* -------------------------------------------------------------------------- */
/* Circuit breaker and pool */
/* -------------------------------------------------------------------------- */

/// Per-endpoint circuit breaker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u64,
    #[serde(with = "duration_millis")]
    pub open_timeout: Duration,
    pub success_threshold: u64,
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_timeout: Duration::from_millis(DEFAULT_OPEN_TIMEOUT_MS),
            success_threshold: 1,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerSettings {
    fn validate(&self) -> NetworkResult<()> {
        if self.failure_threshold == 0 {
            return Err(invalid("circuitBreaker.failureThreshold", "must be at least 1"));
        }
        if self.success_threshold == 0 || self.half_open_max_calls == 0 {
            return Err(invalid("circuitBreaker", "half-open limits must be at least 1"));
        }
        Ok(())
    }
}

/// Connection pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionPoolConfig {
    pub max_connections_per_host: usize,
    /// Idle connections older than this are closed
    #[serde(with = "duration_millis")]
    pub keep_alive_timeout: Duration,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: DEFAULT_MAX_CONNECTIONS_PER_HOST,
            keep_alive_timeout: Duration::from_millis(DEFAULT_KEEP_ALIVE_TIMEOUT_MS),
        }
    }
}

impl ConnectionPoolConfig {
    fn validate(&self) -> NetworkResult<()> {
        if self.max_connections_per_host == 0 {
            return Err(invalid("connectionPool.maxConnectionsPerHost", "must be at least 1"));
        }
        Ok(())
    }
}
