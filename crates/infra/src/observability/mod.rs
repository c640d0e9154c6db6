//! Logging setup and the tracing-backed analytics sink

mod analytics;
pub mod logging;

pub use analytics::TracingAnalytics;
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingError, LoggingGuard, SpanEvents};
