//! Common utility functions and helper macros
//!
//! - **[`macros`]**: `impl_token_conversions!` for string-backed enums
//! - **[`serde`]**: Serialization helpers for durations
//! - **[`fingerprint`]**: blake3 content fingerprints

#[macro_use]
pub mod macros;
pub mod fingerprint;
pub mod serde;

pub use self::fingerprint::{fingerprint, Fingerprint};
pub use self::serde::{duration_millis, option_duration_millis};
