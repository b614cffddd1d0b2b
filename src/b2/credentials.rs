//! B2 Credentials Module
//!
//! Application keys come from the configuration file or, when absent there,
//! from the `B2_APPLICATION_KEY_ID` and `B2_APPLICATION_KEY` environment
//! variables.
//!
//! # Example
//!
//! ```
//! use b2_uploadr::b2::Credentials;
//!
//! let creds = Credentials::new("0051234567890ab0000000001", "K005secret");
//! assert_eq!(creds.application_key_id(), "0051234567890ab0000000001");
//! ```

use crate::config::{is_placeholder, B2Config};
use std::fmt;
use thiserror::Error;

/// Environment variable holding the application key id
pub const KEY_ID_ENV: &str = "B2_APPLICATION_KEY_ID";

/// Environment variable holding the application key
pub const KEY_ENV: &str = "B2_APPLICATION_KEY";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// B2 application key pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    application_key_id: String,
    application_key: String,
}

impl Credentials {
    pub fn new(application_key_id: impl Into<String>, application_key: impl Into<String>) -> Self {
        Self {
            application_key_id: application_key_id.into(),
            application_key: application_key.into(),
        }
    }

    pub fn application_key_id(&self) -> &str {
        &self.application_key_id
    }

    pub fn application_key(&self) -> &str {
        &self.application_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("application_key_id", &self.application_key_id)
            .field("application_key", &"<redacted>")
            .finish()
    }
}

/// Factory methods for loading credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from environment variables
    pub fn from_env() -> Result<Credentials, CredentialsError> {
        let key_id = std::env::var(KEY_ID_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CredentialsError::MissingCredentials(format!("{} not set", KEY_ID_ENV)))?;

        let key = std::env::var(KEY_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CredentialsError::MissingCredentials(format!("{} not set", KEY_ENV)))?;

        Ok(Credentials::new(key_id, key))
    }

    /// Load credentials from B2Config
    ///
    /// Empty values and `${VAR}` placeholders left by a missing variable count
    /// as not set.
    pub fn from_config(config: &B2Config) -> Result<Credentials, CredentialsError> {
        let key_id = configured(&config.application_key_id).ok_or_else(|| {
            CredentialsError::MissingCredentials("application_key_id not set in config".into())
        })?;

        let key = configured(&config.application_key).ok_or_else(|| {
            CredentialsError::MissingCredentials("application_key not set in config".into())
        })?;

        Ok(Credentials::new(key_id, key))
    }

    /// Configuration first, then the environment
    pub fn resolve(config: &B2Config) -> Result<Credentials, CredentialsError> {
        match Self::from_config(config) {
            Ok(credentials) => Ok(credentials),
            Err(config_err) => {
                tracing::debug!(error = %config_err, "Falling back to environment credentials");
                Self::from_env()
            }
        }
    }
}

fn configured(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !is_placeholder(v))
}
