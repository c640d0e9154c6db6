//! # netweave Core
//!
//! Networking engine - no HTTP library dependencies.
//!
//! This crate contains:
//! - Port interfaces (`Transport`, `SecurityProvider`, `AnalyticsSink`,
//!   `HealthProbe`)
//! - The request pipeline and its services: interceptors, circuit breakers,
//!   retry, response cache, load balancer, connection pool, compression,
//!   performance monitor, priority scheduler
//! - The `NetworkCore` facade
//!
//! ## Architecture Principles
//! - Only depends on `netweave-common` and `netweave-domain`
//! - All I/O goes through the port traits; adapters live in `netweave-infra`
//! - Shared services guard their own state and are safe to call from any
//!   task

pub mod balancer;
pub mod breaker;
pub mod cache;
pub mod client;
pub mod compression;
pub mod interceptor;
pub mod monitor;
pub mod pipeline;
pub mod pool;
pub mod ports;
pub mod retry;
pub mod scheduler;
pub mod security;

// Re-export specific items to avoid ambiguity
pub use balancer::{LoadBalancer, ServerDescriptor, ServerLease};
pub use breaker::BreakerRegistry;
pub use cache::{CachedResponse, ResponseCache};
pub use client::{CallBuilder, NetworkCore, NetworkCoreBuilder};
pub use compression::{
    AdaptiveSelector, AlgorithmSelector, CompressionCodec, EncodedPayload, PreferredSelector,
};
pub use interceptor::{
    BasicAuthInterceptor, BearerAuthInterceptor, HeaderInterceptor, Interceptor, InterceptorChain,
    LoggingInterceptor,
};
pub use monitor::{EndpointMetrics, NetworkHealth, NetworkMetrics, PerformanceMonitor};
pub use pipeline::{PipelineComponents, RequestPipeline, TransferProgress};
pub use pool::{ConnectionPool, HostPoolStats, PooledConnection};
pub use ports::{
    AnalyticsSink, ByteStream, HealthProbe, NoopAnalytics, SecurityProvider, StreamResponse,
    Transport, TransportRequest, TransportResponse,
};
pub use retry::{NetworkRetryExecutor, NetworkRetryPolicy};
pub use scheduler::PriorityScheduler;
pub use security::PolicySecurityProvider;
