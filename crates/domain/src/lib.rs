//! # netweave Domain
//!
//! Data model for the networking core.
//!
//! This crate contains:
//! - Request, response and header types
//! - The network error taxonomy and its retry classification
//! - Analytics event types
//! - `NetworkingConfiguration` and its defaults
//!
//! ## Architecture
//! - Depends only on `netweave-common` foundation utilities
//! - No I/O and no async runtime

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
