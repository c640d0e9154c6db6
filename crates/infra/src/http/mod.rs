//! reqwest-backed adapters for the core's transport and health ports

mod health;
mod transport;

pub use health::HttpHealthProbe;
pub use transport::{ReqwestTransport, ReqwestTransportBuilder};
