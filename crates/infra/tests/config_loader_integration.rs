//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files and
//! the environment.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use netweave_domain::{BackoffSetting, CacheEviction, NetworkError, SecurityLevel};
use netweave_infra::config;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn write_temp(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write temp file");
    file
}

/// Validates that every section of a full TOML document is read.
#[test]
fn test_load_full_toml_file() {
    let file = write_temp(
        r#"
baseEndpoint = "https://api.example.com/v1"
timeout = 10000
maxConcurrentRequests = 4

[retryPolicy]
maxAttempts = 5
retryableFailures = ["timeout", "server_error"]

[retryPolicy.backoffStrategy]
type = "exponential"
unit = 250
maxDelay = 4000

[cachePolicy]
maxSize = 2048
maxEntries = 16
defaultTTL = 30000
eviction = "lru"

[compression]
algorithms = ["zlib"]
minSizeThreshold = 256

[security]
level = "strict"
certificatePins = ["sha256/AAAA"]

[loadBalancing]
strategy = "geographic"
healthCheckInterval = 5000
servers = [
    { id = "eu", endpoint = "https://eu.example.com", distance = 10.0 },
    { id = "us", endpoint = "https://us.example.com", distance = 80.0 },
]

[circuitBreaker]
failureThreshold = 3
openTimeout = 15000

[connectionPool]
maxConnectionsPerHost = 4
keepAliveTimeout = 20000
"#,
        ".toml",
    );

    let config = config::load_from_file(Some(file.path().to_path_buf())).expect("valid config");

    assert_eq!(config.timeout, Duration::from_secs(10));
    assert_eq!(config.retry_policy.max_attempts, 5);
    assert_eq!(config.retry_policy.retryable_failures.len(), 2);
    assert_eq!(
        config.retry_policy.backoff_strategy,
        BackoffSetting::Exponential { unit: Duration::from_millis(250), max_delay: Duration::from_secs(4) }
    );
    assert_eq!(config.cache_policy.max_entries, Some(16));
    assert_eq!(config.cache_policy.eviction, CacheEviction::Lru);
    assert_eq!(config.compression.min_size_threshold, 256);
    assert_eq!(config.security.level, SecurityLevel::Strict);
    assert_eq!(config.security.certificate_pins, ["sha256/AAAA"]);
    assert_eq!(config.load_balancing.servers[1].distance, 80.0);
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.connection_pool.keep_alive_timeout, Duration::from_secs(20));
}

/// Validates that a configuration rejected by validation is not returned.
#[test]
fn test_invalid_server_is_rejected() {
    let file = write_temp(
        r#"{ "loadBalancing": { "servers": [ { "id": "a", "endpoint": "ftp://a.example.com" } ] } }"#,
        ".json",
    );

    let err = config::load_from_file(Some(file.path().to_path_buf())).unwrap_err();
    assert!(matches!(err, NetworkError::Config(_)));
}

/// Validates that environment overrides layer on top of the file named by
/// `NETWEAVE_CONFIG`.
///
/// # Test Steps
/// 1. Write a JSON file with a base endpoint and a timeout
/// 2. Point `NETWEAVE_CONFIG` at it and override the timeout
/// 3. The file's endpoint and the environment's timeout both apply
#[test]
fn test_load_merges_file_and_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    let file = write_temp(r#"{ "baseEndpoint": "https://file.example.com", "timeout": 1000 }"#, ".json");
    std::env::set_var("NETWEAVE_CONFIG", file.path());
    std::env::set_var("NETWEAVE_TIMEOUT_MS", "7000");

    let result = config::load();

    std::env::remove_var("NETWEAVE_CONFIG");
    std::env::remove_var("NETWEAVE_TIMEOUT_MS");

    let config = result.expect("merged config");
    assert_eq!(config.base_endpoint.as_deref(), Some("https://file.example.com"));
    assert_eq!(config.timeout, Duration::from_secs(7));
}

/// Validates that a missing `NETWEAVE_CONFIG` target is an error rather
/// than a silent fallback to defaults.
#[test]
fn test_load_with_missing_named_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    std::env::set_var("NETWEAVE_CONFIG", "/nonexistent/netweave.toml");

    let result = config::load();

    std::env::remove_var("NETWEAVE_CONFIG");
    assert!(matches!(result, Err(NetworkError::Config(msg)) if msg.contains("not found")));
}
