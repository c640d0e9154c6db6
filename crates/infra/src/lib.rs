//! # netweave Infrastructure
//!
//! Infrastructure implementations of the core's ports.
//!
//! This crate contains:
//! - The reqwest `Transport` and HTTP health probe
//! - Configuration loading from environment and files
//! - Logging setup and a tracing analytics sink
//!
//! ## Architecture
//! - Implements traits defined in `netweave-core`
//! - Contains all "impure" code (sockets, files, environment)

mod bootstrap;
pub mod config;
pub mod errors;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use bootstrap::reqwest_core;
pub use errors::InfraError;
pub use http::*;
pub use observability::{init_logging, LoggingConfig, TracingAnalytics};
