//! Logging System
//!
//! Structured logging via the `tracing` crate. The engine itself only emits
//! events; an embedding process opts into a subscriber with
//! [`init_logging`].

use crate::error::Error;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Enable colored output (text format only)
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            color: default_true(),
        }
    }
}

/// Initialize the logging system.
///
/// Priority order (highest to lowest):
/// 1. `WEFT_LOG` environment variable (a full env-filter directive)
/// 2. Configuration
/// 3. Defaults
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), Error> {
    let filter = build_env_filter(config)?;
    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    let use_color = config.map(|c| c.color).unwrap_or(true);

    let base_subscriber = Registry::default().with(filter);
    match format {
        "json" => {
            base_subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        "text" => {
            base_subscriber
                .with(fmt::layer().with_target(true).with_ansi(use_color))
                .init();
        }
        other => {
            return Err(Error::InvalidArgument(format!(
                "invalid log format: {} (must be 'json' or 'text')",
                other
            )));
        }
    }

    Ok(())
}

fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, Error> {
    if let Ok(filter) = EnvFilter::try_from_env("WEFT_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    level
        .parse::<EnvFilter>()
        .map_err(|e| Error::InvalidArgument(format!("invalid log level {:?}: {}", level, e)))
}
