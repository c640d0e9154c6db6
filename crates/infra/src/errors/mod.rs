//! Infrastructure error handling
//!
//! Adapters report failures as [`NetworkError`]s so the pipeline can
//! classify them. [`InfraError`] carries the conversions from third-party
//! error types.

mod conversions;

pub use conversions::InfraError;
pub(crate) use conversions::transport_error;
