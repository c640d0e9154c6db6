//! Networking defaults
//!
//! Centralized location for the default values used by
//! [`NetworkingConfiguration`](crate::NetworkingConfiguration).

// Request execution
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 8;
pub const DEFAULT_STREAM_CHUNK_SIZE: usize = 64 * 1024;

// Retry
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_UNIT_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

// Cache
pub const DEFAULT_CACHE_MAX_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_CACHE_TTL_MS: u64 = 300_000;
pub const DEFAULT_CACHE_SWEEP_INTERVAL_MS: u64 = 60_000;

// Compression
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

// Load balancing
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/health";

// Circuit breaker
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 60_000;

// Connection pool
pub const DEFAULT_MAX_CONNECTIONS_PER_HOST: usize = 6;
pub const DEFAULT_KEEP_ALIVE_TIMEOUT_MS: u64 = 90_000;

// Headers
pub const HEADER_CONTENT_ENCODING: &str = "Content-Encoding";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_ACCEPT_ENCODING: &str = "Accept-Encoding";
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";
