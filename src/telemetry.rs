//! Structured logging setup.
//!
//! Built on `tracing` and `tracing-subscriber`: environment-based filtering
//! (`RUST_LOG` wins when set), a choice of output formats, and an idempotent
//! `init` so tests and the library can both call it safely.

use crate::config::StimConfig;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// Human-oriented format with colors (development default)
    #[default]
    Pretty,
    /// Single-line format without colors (headless/production)
    Compact,
}

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Base log level when `RUST_LOG` is not set
    pub level: Level,
    /// Line format
    pub format: LogFormat,
    /// ANSI colors (Pretty format only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Config at the given level with default formatting.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize tracing from the application configuration.
pub fn init_from_config(config: &StimConfig) -> Result<(), String> {
    let level = parse_log_level(&config.application.log_level)?;
    init(TracingConfig::new(level))
}

/// Initialize the global tracing subscriber.
///
/// Idempotent: if a subscriber is already installed (common in test runs),
/// this returns `Ok(())` instead of erroring.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let result = match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_thread_names(true)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_thread_names(true)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(layer).try_init()
        }
    };

    match result {
        Ok(()) => Ok(()),
        // A subscriber installed earlier in the process keeps working; not an error.
        Err(e) if e.to_string().contains("has already been set") => Ok(()),
        Err(e) => Err(format!("Failed to initialize tracing: {e}")),
    }
}

fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        )),
    }
}
