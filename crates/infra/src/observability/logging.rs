//! Structured logging configuration.
//!
//! Provides configurable logging with:
//! - JSON, pretty or compact console output
//! - `RUST_LOG` / level / directive filtering
//! - Optional daily-rolling JSON log files

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Console output format
    pub format: LogFormat,
    /// Include timestamps
    pub timestamps: bool,
    /// Include source location
    pub include_location: bool,
    /// Include span events
    pub span_events: SpanEvents,
    /// Filter directives (e.g., "netweave_core=debug,hyper=warn")
    pub filter: Option<String>,
    /// Also write JSON logs to daily files
    pub file: Option<FileLogging>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Pretty,
            timestamps: true,
            include_location: false,
            span_events: SpanEvents::None,
            filter: None,
            file: None,
        }
    }
}

/// Daily-rolling log files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLogging {
    pub directory: PathBuf,
    /// File name prefix; the date is appended
    pub prefix: String,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `NETWEAVE_LOG_LEVEL`, `NETWEAVE_LOG_FORMAT`
    /// and `NETWEAVE_LOG_DIR`. Unknown formats fall back to pretty.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("NETWEAVE_LOG_LEVEL") {
            config.level = level;
        }
        if let Ok(format) = std::env::var("NETWEAVE_LOG_FORMAT") {
            config.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
        if let Ok(dir) = std::env::var("NETWEAVE_LOG_DIR") {
            config.file = Some(FileLogging { directory: dir.into(), prefix: "netweave.log".to_string() });
        }
        config
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_file(mut self, directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        self.file = Some(FileLogging { directory: directory.into(), prefix: prefix.into() });
        self
    }

    /// The configured level; unknown names mean `INFO`
    pub fn tracing_level(&self) -> Level {
        match self.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Compact,
}

/// Span event configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanEvents {
    #[default]
    None,
    Enter,
    Exit,
    Full,
    /// Span creation and close, which is when `#[instrument]`ed requests
    /// report their duration
    Lifecycle,
}

impl SpanEvents {
    fn to_fmt_span(self) -> FmtSpan {
        match self {
            Self::None => FmtSpan::NONE,
            Self::Enter => FmtSpan::ENTER,
            Self::Exit => FmtSpan::EXIT,
            Self::Full => FmtSpan::ENTER | FmtSpan::EXIT,
            Self::Lifecycle => FmtSpan::NEW | FmtSpan::CLOSE,
        }
    }
}

/// Keeps the file writer flushing; drop it at shutdown
#[derive(Debug, Default)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// # Errors
/// Returns error if the filter does not parse or a global subscriber is
/// already installed
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    if !config.enabled {
        return Ok(LoggingGuard::default());
    }

    let filter = build_filter(config)?;
    let mut layers = vec![console_layer(config)];
    let mut guard = LoggingGuard::default();

    if let Some(file) = &config.file {
        std::fs::create_dir_all(&file.directory)
            .map_err(|e| LoggingError::File(format!("{}: {e}", file.directory.display())))?;
        let appender = tracing_appender::rolling::daily(&file.directory, &file.prefix);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(fmt::layer().json().with_writer(writer).with_ansi(false).with_target(true).boxed());
        guard._file = Some(worker);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;
    Ok(guard)
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Some(directives) = &config.filter {
        return EnvFilter::try_new(format!("{},{}", config.level, directives))
            .map_err(|e| LoggingError::FilterParse(e.to_string()));
    }
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)))
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    let span_events = config.span_events.to_fmt_span();
    let location = config.include_location;

    match config.format {
        // JSON always carries timestamps
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(location)
            .with_line_number(location)
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(location)
                .with_line_number(location)
                .with_target(true);
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(location)
                .with_line_number(location)
                .with_target(true);
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize logging: {0}")]
    Init(String),
    #[error("Failed to parse log filter: {0}")]
    FilterParse(String),
    #[error("Failed to prepare log directory: {0}")]
    File(String),
}
