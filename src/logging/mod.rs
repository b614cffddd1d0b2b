//! Logging setup
//!
//! Installs a `tracing` subscriber made of:
//! - **EnvFilter**: `RUST_LOG` when set, otherwise the configured level
//! - **Fmt layer**: human-readable or JSON lines on stderr
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG | logging.level)
//!   └── Fmt Layer (pretty | json, stderr)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use b2_uploadr::config::LoggingConfig;
//! use b2_uploadr::logging::init_subscriber;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! init_subscriber(&LoggingConfig::default())?;
//! # Ok(())
//! # }
//! ```

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging setup errors
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log level '{level}': {reason}")]
    InvalidLevel { level: String, reason: String },

    #[error("Invalid log format '{0}': must be 'pretty' or 'json'")]
    InvalidFormat(String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    Init(String),
}

/// Filter from `RUST_LOG`, falling back to `default_level`
pub fn build_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_level).map_err(|e| LoggingError::InvalidLevel {
        level: default_level.to_string(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already set.
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = build_filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format.as_str() {
        "json" => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true);
            tracing::subscriber::set_global_default(registry.with(fmt_layer))
        }
        "pretty" => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true);
            tracing::subscriber::set_global_default(registry.with(fmt_layer))
        }
        other => return Err(LoggingError::InvalidFormat(other.to_string())),
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_format_rejected() {
        let config = LoggingConfig {
            level: "info".into(),
            format: "xml".into(),
        };
        assert!(matches!(
            init_subscriber(&config),
            Err(LoggingError::InvalidFormat(_)) | Err(LoggingError::InvalidLevel { .. })
        ));
    }

    #[test]
    fn test_filter_accepts_directives() {
        assert!(build_filter("info,b2_uploadr=debug").is_ok());
    }

    #[test]
    fn test_subscriber_init() {
        // A global subscriber may already be installed by another test
        assert!(matches!(
            init_subscriber(&LoggingConfig::default()),
            Ok(()) | Err(LoggingError::Init(_))
        ));
    }
}
