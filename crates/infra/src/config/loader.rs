//! Configuration loader
//!
//! Loads a [`NetworkingConfiguration`] from a file, environment variables,
//! or both.
//!
//! ## Loading Strategy
//! 1. Read `.env` from the working directory if present (via `dotenvy`)
//! 2. Start from the file named by `NETWEAVE_CONFIG`, else the first file
//!    found by [`probe_config_paths`], else the defaults
//! 3. Apply `NETWEAVE_*` environment overrides on top
//! 4. Validate the result
//!
//! ## Environment Variables
//! - `NETWEAVE_CONFIG`: Path to a config file
//! - `NETWEAVE_BASE_ENDPOINT`: Base URL for relative endpoints
//! - `NETWEAVE_TIMEOUT_MS`: Per-attempt timeout in milliseconds
//! - `NETWEAVE_MAX_ATTEMPTS`: Total attempts including the first
//! - `NETWEAVE_MAX_CONCURRENT_REQUESTS`: Priority queue workers
//! - `NETWEAVE_CACHE_ENABLED`: Whether responses are cached (true/false)
//! - `NETWEAVE_CACHE_MAX_SIZE`: Cache budget in bytes
//! - `NETWEAVE_CACHE_TTL_MS`: Default cache TTL in milliseconds
//! - `NETWEAVE_COMPRESSION_ENABLED`: Whether bodies are compressed
//! - `NETWEAVE_SECURITY_LEVEL`: `none`, `standard` or `strict`
//! - `NETWEAVE_LOAD_BALANCING_STRATEGY`: `roundRobin`, `leastConnections`,
//!   `weighted` or `geographic`
//! - `NETWEAVE_CB_FAILURE_THRESHOLD`: Failures before a circuit opens
//! - `NETWEAVE_CB_OPEN_TIMEOUT_MS`: Time a circuit stays open
//! - `NETWEAVE_POOL_MAX_PER_HOST`: Connections per host
//! - `NETWEAVE_POOL_KEEP_ALIVE_MS`: Idle connection lifetime
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./netweave.{toml,json}` then `./config.{toml,json}`
//! 2. The same names in the parent and grandparent directories
//! 3. The same names next to the executable

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use netweave_domain::{NetworkError, NetworkResult, NetworkingConfiguration};

use crate::errors::InfraError;

const FILE_NAMES: [&str; 4] = ["netweave.toml", "netweave.json", "config.toml", "config.json"];

/// Load configuration from file and environment
///
/// # Errors
/// Returns `NetworkError::Config` if:
/// - `NETWEAVE_CONFIG` names a missing or unreadable file
/// - File format is invalid
/// - An override has an invalid value
/// - The merged configuration fails validation
pub fn load() -> NetworkResult<NetworkingConfiguration> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }

    let mut config = match std::env::var("NETWEAVE_CONFIG") {
        Ok(path) => read_file(Some(PathBuf::from(path)))?,
        Err(_) => match probe_config_paths() {
            Some(path) => read_file(Some(path))?,
            None => {
                tracing::debug!("No config file found, starting from defaults");
                NetworkingConfiguration::default()
            }
        },
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    tracing::info!(base_endpoint = ?config.base_endpoint, "Configuration loaded");
    Ok(config)
}

/// Defaults with `NETWEAVE_*` environment overrides applied
///
/// # Errors
/// Returns `NetworkError::Config` for invalid values or a configuration that
/// fails validation.
pub fn load_from_env() -> NetworkResult<NetworkingConfiguration> {
    let mut config = NetworkingConfiguration::default();
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Supports both JSON
/// and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `NetworkError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - The configuration fails validation
pub fn load_from_file(path: Option<PathBuf>) -> NetworkResult<NetworkingConfiguration> {
    let config = read_file(path)?;
    config.validate()?;
    Ok(config)
}

fn read_file(path: Option<PathBuf>) -> NetworkResult<NetworkingConfiguration> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(NetworkError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            NetworkError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| NetworkError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content, format chosen by extension
fn parse_config(contents: &str, path: &Path) -> NetworkResult<NetworkingConfiguration> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| InfraError::from(e).into()),
        "json" => serde_json::from_str(contents).map_err(|e| InfraError::from(e).into()),
        _ => Err(NetworkError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.push(exe_dir.to_path_buf());
        }
    }

    dirs.iter()
        .flat_map(|dir| FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

/// Apply `NETWEAVE_*` overrides read through `lookup`
fn apply_overrides(
    config: &mut NetworkingConfiguration,
    lookup: impl Fn(&str) -> Option<String>,
) -> NetworkResult<()> {
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(base) = var("NETWEAVE_BASE_ENDPOINT") {
        config.base_endpoint = Some(base);
    }
    if let Some(ms) = parsed::<u64>(var("NETWEAVE_TIMEOUT_MS"), "NETWEAVE_TIMEOUT_MS")? {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(n) = parsed(var("NETWEAVE_MAX_ATTEMPTS"), "NETWEAVE_MAX_ATTEMPTS")? {
        config.retry_policy.max_attempts = n;
    }
    if let Some(n) = parsed(var("NETWEAVE_MAX_CONCURRENT_REQUESTS"), "NETWEAVE_MAX_CONCURRENT_REQUESTS")? {
        config.max_concurrent_requests = n;
    }

    if let Some(raw) = var("NETWEAVE_CACHE_ENABLED") {
        config.cache_policy.enabled = parse_bool(&raw, "NETWEAVE_CACHE_ENABLED")?;
    }
    if let Some(bytes) = parsed(var("NETWEAVE_CACHE_MAX_SIZE"), "NETWEAVE_CACHE_MAX_SIZE")? {
        config.cache_policy.max_size = bytes;
    }
    if let Some(ms) = parsed::<u64>(var("NETWEAVE_CACHE_TTL_MS"), "NETWEAVE_CACHE_TTL_MS")? {
        config.cache_policy.default_ttl = Duration::from_millis(ms);
    }
    if let Some(raw) = var("NETWEAVE_COMPRESSION_ENABLED") {
        config.compression.enabled = parse_bool(&raw, "NETWEAVE_COMPRESSION_ENABLED")?;
    }

    if let Some(level) = tokens(var("NETWEAVE_SECURITY_LEVEL"))? {
        config.security.level = level;
    }
    if let Some(strategy) = tokens(var("NETWEAVE_LOAD_BALANCING_STRATEGY"))? {
        config.load_balancing.strategy = strategy;
    }

    if let Some(n) = parsed(var("NETWEAVE_CB_FAILURE_THRESHOLD"), "NETWEAVE_CB_FAILURE_THRESHOLD")? {
        config.circuit_breaker.failure_threshold = n;
    }
    if let Some(ms) = parsed::<u64>(var("NETWEAVE_CB_OPEN_TIMEOUT_MS"), "NETWEAVE_CB_OPEN_TIMEOUT_MS")? {
        config.circuit_breaker.open_timeout = Duration::from_millis(ms);
    }
    if let Some(n) = parsed(var("NETWEAVE_POOL_MAX_PER_HOST"), "NETWEAVE_POOL_MAX_PER_HOST")? {
        config.connection_pool.max_connections_per_host = n;
    }
    if let Some(ms) = parsed::<u64>(var("NETWEAVE_POOL_KEEP_ALIVE_MS"), "NETWEAVE_POOL_KEEP_ALIVE_MS")? {
        config.connection_pool.keep_alive_timeout = Duration::from_millis(ms);
    }

    Ok(())
}

fn parsed<T>(raw: Option<String>, key: &str) -> NetworkResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.parse::<T>().map_err(|e| NetworkError::Config(format!("Invalid {key} '{value}': {e}")))
    })
    .transpose()
}

/// Enum values use the same tokens as the config file; the error names the
/// accepted type
fn tokens<T: FromStr<Err = String>>(raw: Option<String>) -> NetworkResult<Option<T>> {
    raw.map(|value| value.parse::<T>().map_err(NetworkError::Config)).transpose()
}

/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(raw: &str, key: &str) -> NetworkResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(NetworkError::Config(format!("Invalid {key} '{other}': expected a boolean"))),
    }
}
