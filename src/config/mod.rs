//! Configuration module for b2-uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use crate::b2::RetryPolicy;
use crate::upload::part_size::{MAX_PARALLEL, MAX_PARTS, MAX_PART_SIZE, MIN_PART_SIZE};
use crate::upload::{PartLimits, UploadOptions};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static! {
    static ref ENV_VAR: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with an uppercase letter or underscore and
/// contain only uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    ENV_VAR
        .replace_all(s, |cap: &regex_lite::Captures<'_>| {
            match std::env::var(&cap[1]) {
                Ok(value) => value,
                Err(_) => match cap.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => cap[0].to_string(),
                },
            }
        })
        .into_owned()
}

/// Whether a value is still an unexpanded `${VAR}` placeholder
pub(crate) fn is_placeholder(value: &str) -> bool {
    value.starts_with("${") && value.ends_with('}')
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub b2: B2Config,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.b2.endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid B2 endpoint '{}': must start with http:// or https://",
                self.b2.endpoint
            )));
        }

        if self.b2.timeout_seconds == Some(0) {
            return Err(ConfigError::ValidationError(
                "timeout_seconds must be greater than 0".into(),
            ));
        }

        let retry = &self.b2.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid jitter_factor {}: must be between 0.0 and 1.0",
                retry.jitter_factor
            )));
        }

        let upload = &self.upload;
        if upload.min_part_size == 0 || upload.min_part_size > upload.max_part_size {
            return Err(ConfigError::ValidationError(format!(
                "Invalid part sizes: need 0 < min_part_size ({}) <= max_part_size ({})",
                upload.min_part_size, upload.max_part_size
            )));
        }
        if upload.max_parts == 0 || upload.max_parts > MAX_PARTS {
            return Err(ConfigError::ValidationError(format!(
                "Invalid max_parts {}: must be between 1 and {}",
                upload.max_parts, MAX_PARTS
            )));
        }
        if upload.max_parallel == 0 {
            return Err(ConfigError::ValidationError(
                "max_parallel must be at least 1".into(),
            ));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format '{}': must be 'pretty' or 'json'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Backblaze B2 account configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct B2Config {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub application_key_id: Option<String>,
    #[serde(default)]
    pub application_key: Option<String>,
    /// Default bucket for uploads
    #[serde(default)]
    pub bucket_id: Option<String>,
    /// Per-request timeout; none when unset
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl B2Config {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

impl Default for B2Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            application_key_id: None,
            application_key: None,
            bucket_id: None,
            timeout_seconds: None,
            retry: RetryConfig::default(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.backblazeb2.com".to_string()
}

/// Retry settings for idempotent B2 API calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            jitter_factor: config.jitter_factor,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_jitter_factor() -> f64 {
    0.25
}

/// Upload engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_min_part_size")]
    pub min_part_size: u64,
    #[serde(default = "default_max_part_size")]
    pub max_part_size: u64,
    #[serde(default = "default_max_parts")]
    pub max_parts: u32,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_vary_part_sizes")]
    pub vary_part_sizes: bool,
    #[serde(default)]
    pub development: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            min_part_size: default_min_part_size(),
            max_part_size: default_max_part_size(),
            max_parts: default_max_parts(),
            max_parallel: default_max_parallel(),
            vary_part_sizes: default_vary_part_sizes(),
            development: false,
        }
    }
}

impl From<&UploadConfig> for UploadOptions {
    fn from(config: &UploadConfig) -> Self {
        UploadOptions {
            limits: PartLimits {
                min_part_size: config.min_part_size,
                max_part_size: config.max_part_size,
                max_parts: config.max_parts,
            },
            max_parallel: config.max_parallel,
            vary_part_sizes: config.vary_part_sizes,
            development: config.development,
        }
    }
}

fn default_min_part_size() -> u64 {
    MIN_PART_SIZE
}

fn default_max_part_size() -> u64 {
    MAX_PART_SIZE
}

fn default_max_parts() -> u32 {
    MAX_PARTS
}

fn default_max_parallel() -> usize {
    MAX_PARALLEL
}

fn default_vary_part_sizes() -> bool {
    true
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Print the Prometheus text exposition after the upload
    #[serde(default)]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.b2.endpoint, "https://api.backblazeb2.com");
        assert_eq!(config.upload.max_parallel, 4);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_validation_bad_endpoint() {
        let mut config = Config::default();
        config.b2.endpoint = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_part_sizes() {
        let mut config = Config::default();
        config.upload.min_part_size = 10;
        config.upload.max_part_size = 5;
        assert!(config.validate().is_err());

        config.upload.min_part_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_limits() {
        let mut config = Config::default();
        config.upload.max_parts = 10_001;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upload.max_parallel = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.b2.retry.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_options_conversion() {
        let config = UploadConfig {
            min_part_size: 1024,
            max_part_size: 4096,
            max_parts: 50,
            max_parallel: 2,
            vary_part_sizes: false,
            development: true,
        };
        let options = UploadOptions::from(&config);
        assert_eq!(options.limits.min_part_size, 1024);
        assert_eq!(options.limits.max_part_size, 4096);
        assert_eq!(options.limits.max_parts, 50);
        assert_eq!(options.max_parallel, 2);
        assert!(!options.vary_part_sizes);
        assert!(options.development);
    }

    #[test]
    fn test_expand_env_vars_default_and_placeholder() {
        assert_eq!(
            expand_env_vars("${B2_UPLOADR_SURELY_UNSET_VAR:-fallback}"),
            "fallback"
        );
        assert_eq!(
            expand_env_vars("key: ${B2_UPLOADR_SURELY_UNSET_VAR}"),
            "key: ${B2_UPLOADR_SURELY_UNSET_VAR}"
        );
        assert!(is_placeholder("${B2_APPLICATION_KEY}"));
        assert!(!is_placeholder("K005abc"));
    }
}
