//! Per-endpoint circuit breakers
//!
//! One [`CircuitBreaker`] per distinct endpoint string, created the first
//! time the endpoint is called. Failures on one endpoint never open the
//! circuit of another.

use std::sync::Arc;

use dashmap::DashMap;
use netweave_common::error::ErrorClassification;
use netweave_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, SharedClock,
    SystemClock,
};
use netweave_domain::{CircuitBreakerSettings, NetworkError, NetworkResult};
use parking_lot::RwLock;
use tracing::{debug, info};

/// Breaker type used throughout the core
pub type EndpointBreaker = CircuitBreaker<SharedClock>;

/// Lazily populated map of endpoint to breaker
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<EndpointBreaker>>,
    config: RwLock<CircuitBreakerConfig>,
    clock: SharedClock,
}

impl BreakerRegistry {
    pub fn new(settings: &CircuitBreakerSettings) -> NetworkResult<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: &CircuitBreakerSettings, clock: SharedClock) -> NetworkResult<Self> {
        Ok(Self {
            breakers: DashMap::new(),
            config: RwLock::new(breaker_config(settings)?),
            clock,
        })
    }

    /// Breaker for `endpoint`, created on first use
    pub fn get_or_create(&self, endpoint: &str) -> NetworkResult<Arc<EndpointBreaker>> {
        if let Some(existing) = self.breakers.get(endpoint) {
            return Ok(Arc::clone(existing.value()));
        }

        // Held until the insert so a concurrent reconfigure sees the new entry
        let config = self.config.read();
        let breaker = CircuitBreaker::with_clock(endpoint, config.clone(), Arc::clone(&self.clock))
            .map_err(|e| NetworkError::Config(format!("circuitBreaker: {e}")))?;
        let entry = self.breakers.entry(endpoint.to_string()).or_insert_with(|| {
            debug!(endpoint, "creating circuit breaker");
            Arc::new(breaker)
        });
        Ok(Arc::clone(entry.value()))
    }

    /// Current state; endpoints never called report `Closed`
    pub fn state(&self, endpoint: &str) -> CircuitState {
        self.breakers.get(endpoint).map(|b| b.state()).unwrap_or(CircuitState::Closed)
    }

    pub fn metrics(&self, endpoint: &str) -> Option<CircuitBreakerMetrics> {
        self.breakers.get(endpoint).map(|b| b.metrics())
    }

    /// Force a breaker back to `Closed`. Returns whether it existed.
    pub fn reset(&self, endpoint: &str) -> bool {
        match self.breakers.get(endpoint) {
            Some(breaker) => {
                breaker.reset();
                info!(endpoint, "circuit breaker reset");
                true
            }
            None => false,
        }
    }

    /// Endpoints with a breaker, in no particular order
    pub fn endpoints(&self) -> Vec<String> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Replace the settings. Existing breakers keep their state and
    /// counters and pick up the new thresholds in place.
    pub fn reconfigure(&self, settings: &CircuitBreakerSettings) -> NetworkResult<()> {
        let config = breaker_config(settings)?;
        let mut current = self.config.write();
        if *current != config {
            for breaker in self.breakers.iter() {
                breaker
                    .update_config(config.clone())
                    .map_err(|e| NetworkError::Config(format!("circuitBreaker: {e}")))?;
            }
            *current = config;
            info!(
                failure_threshold = settings.failure_threshold,
                open_timeout_ms = settings.open_timeout.as_millis() as u64,
                "circuit breaker settings changed"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("breakers", &self.breakers.len())
            .field("config", &*self.config.read())
            .finish()
    }
}

fn breaker_config(settings: &CircuitBreakerSettings) -> NetworkResult<CircuitBreakerConfig> {
    CircuitBreakerConfig::builder()
        .failure_threshold(settings.failure_threshold)
        .success_threshold(settings.success_threshold)
        .open_timeout(settings.open_timeout)
        .half_open_max_calls(settings.half_open_max_calls)
        .build()
        .map_err(|e| NetworkError::Config(format!("circuitBreaker: {e}")))
}

/// Convert a breaker rejection into the error callers see
pub(crate) fn open_circuit_error(endpoint: &str, rejection: &impl ErrorClassification) -> NetworkError {
    NetworkError::CircuitOpen { endpoint: endpoint.to_string(), retry_after: rejection.retry_after() }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use netweave_common::resilience::MockClock;

    use super::*;

    fn registry(clock: &MockClock) -> BreakerRegistry {
        let settings = CircuitBreakerSettings {
            failure_threshold: 2,
            open_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        BreakerRegistry::with_clock(&settings, Arc::new(clock.clone())).unwrap()
    }

    #[test]
    fn test_endpoints_are_isolated() {
        let clock = MockClock::new();
        let registry = registry(&clock);

        let users = registry.get_or_create("/users").unwrap();
        users.record_failure();
        users.record_failure();

        assert_eq!(registry.state("/users"), CircuitState::Open);
        assert_eq!(registry.state("/orders"), CircuitState::Closed);
        assert!(registry.get_or_create("/orders").unwrap().try_acquire().is_ok());
        assert!(Arc::ptr_eq(&users, &registry.get_or_create("/users").unwrap()));
    }

    #[test]
    fn test_rejection_carries_retry_after() {
        let clock = MockClock::new();
        let registry = registry(&clock);
        let breaker = registry.get_or_create("/slow").unwrap();
        breaker.record_failure();
        breaker.record_failure();
        clock.advance(Duration::from_secs(4));

        let rejection = breaker.try_acquire().unwrap_err();
        let error = open_circuit_error("/slow", &rejection);
        assert_eq!(
            error,
            NetworkError::CircuitOpen {
                endpoint: "/slow".into(),
                retry_after: Some(Duration::from_secs(6))
            }
        );
    }

    #[test]
    fn test_reconfigure_keeps_breaker_state() {
        let clock = MockClock::new();
        let registry = registry(&clock);
        let breaker = registry.get_or_create("/a").unwrap();
        breaker.record_failure();
        breaker.record_failure();
        let counting = registry.get_or_create("/b").unwrap();
        counting.record_failure();

        registry
            .reconfigure(&CircuitBreakerSettings { failure_threshold: 3, ..Default::default() })
            .unwrap();
        assert_eq!(registry.state("/a"), CircuitState::Open);
        assert!(Arc::ptr_eq(&breaker, &registry.get_or_create("/a").unwrap()));
        assert_eq!(breaker.config().failure_threshold, 3);

        // Counters carry over: two more failures reach the new threshold
        counting.record_failure();
        assert_eq!(registry.state("/b"), CircuitState::Closed);
        counting.record_failure();
        assert_eq!(registry.state("/b"), CircuitState::Open);

        assert_eq!(registry.get_or_create("/new").unwrap().config().failure_threshold, 3);

        assert!(registry
            .reconfigure(&CircuitBreakerSettings { failure_threshold: 0, ..Default::default() })
            .is_err());
    }

    #[test]
    fn test_reset() {
        let clock = MockClock::new();
        let registry = registry(&clock);
        assert!(!registry.reset("/none"));

        let breaker = registry.get_or_create("/a").unwrap();
        breaker.record_failure();
        breaker.record_failure();
        assert!(registry.reset("/a"));
        assert_eq!(registry.state("/a"), CircuitState::Closed);
    }
}
