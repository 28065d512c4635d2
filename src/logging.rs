//! Subscriber setup for structured logging.
//!
//! The library only emits `tracing` events; installing a subscriber is up to the
//! application. [`init`] builds a registry with a single `fmt` layer in one of
//! three formats, filtered by `RUST_LOG` when set and by the configured level
//! otherwise.
//!
//! # Example
//! ```no_run
//! use daq_record_loop::{config::LoopConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoopConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!(queue_capacity = config.queue.capacity, "Configuration loaded");
//! # Ok(())
//! # }
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoopConfig;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, colored (interactive use)
    #[default]
    Pretty,
    /// Single-line, no colors (services)
    Compact,
    /// One JSON object per line (log aggregation)
    Json,
}

/// Subscriber installation failed.
#[derive(Error, Debug)]
pub enum LoggingError {
    /// The level string is not a tracing level.
    #[error("invalid log level '{0}'; must be one of: trace, debug, info, warn, error")]
    InvalidLevel(String),

    /// The subscriber could not be installed.
    #[error("failed to initialize logging: {0}")]
    Init(String),
}

/// Logging options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is not set
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Log span open/close events
    pub with_span_events: bool,
    /// Include source file and line
    pub with_file_and_line: bool,
    /// Include thread names (the loop thread is named `record-loop`)
    pub with_thread_names: bool,
    /// Colored output, pretty format only
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Options at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Options from the `[application]` section.
    pub fn from_loop_config(config: &LoopConfig) -> Result<Self, LoggingError> {
        Ok(Self::new(parse_level(&config.application.log_level)?))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colors
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install a subscriber from the loop configuration.
pub fn init_from_config(config: &LoopConfig) -> Result<(), LoggingError> {
    init(LoggingConfig::from_loop_config(config)?)
}

/// Install a subscriber.
///
/// Idempotent: when a global subscriber is already set this returns `Ok(())`,
/// so tests and embedding applications may call it freely.
pub fn init(config: LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .with_filter(filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(false)
            .with_filter(filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_filter(filter)
            .boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(LoggingError::Init(e.to_string())),
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_level(level: &str) -> Result<Level, LoggingError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}
