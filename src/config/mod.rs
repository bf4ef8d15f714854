//! Configuration module for upload-destination
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! secret:
//!   file: /etc/upload-destination/.secret
//! finalize:
//!   issuer: gitlab-workhorse
//!   token_ttl_secs: 300
//! upload:
//!   default_timeout_secs: 14400
//! object_storage:
//!   provider: AWS
//!   s3:
//!     aws_access_key_id: "${AWS_ACCESS_KEY_ID}"
//!     aws_secret_access_key: "${AWS_SECRET_ACCESS_KEY}"
//! logging:
//!   level: info
//!   format: json
//! ```

use crate::destination::opts::S3Credentials;
use crate::secret::{Secret, SecretError, TokenSigner, DEFAULT_ISSUER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

fn is_valid_log_level(level: &str) -> bool {
    matches!(
        level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    )
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

    #[error("Invalid secret: {0}")]
    SecretError(#[from] SecretError),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub secret: SecretConfig,
    #[serde(default)]
    pub finalize: FinalizeConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub object_storage: Option<ObjectStorageCredentials>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.secret.file, &self.secret.value) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ValidationError(
                    "secret: set either file or value, not both".into(),
                ))
            }
            (None, None) => {
                return Err(ConfigError::ValidationError(
                    "secret: one of file or value is required".into(),
                ))
            }
            _ => {}
        }

        if self.finalize.issuer.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "finalize.issuer cannot be empty".into(),
            ));
        }

        if self.finalize.token_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "finalize.token_ttl_secs must be positive".into(),
            ));
        }

        if self.upload.default_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "upload.default_timeout_secs must be positive".into(),
            ));
        }

        if let Some(ref storage) = self.object_storage {
            if storage.provider.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "object_storage.provider cannot be empty".into(),
                ));
            }
        }

        if !is_valid_log_level(&self.logging.level) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}': must be one of trace, debug, info, warn, error",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Decode the shared secret, reading the secret file if configured
    pub fn load_secret(&self) -> Result<Secret, ConfigError> {
        let secret = match (&self.secret.file, &self.secret.value) {
            (Some(file), _) => Secret::load(file)?,
            (None, Some(value)) => Secret::from_base64(value)?,
            (None, None) => {
                return Err(ConfigError::ValidationError(
                    "secret: one of file or value is required".into(),
                ))
            }
        };
        Ok(secret)
    }

    /// Token signer for finalize fields
    pub fn token_signer(&self) -> Result<TokenSigner, ConfigError> {
        Ok(TokenSigner::new(&self.load_secret()?)
            .with_issuer(&self.finalize.issuer)
            .with_ttl(Duration::from_secs(self.finalize.token_ttl_secs)))
    }
}

/// Shared secret location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretConfig {
    /// File holding the base64 secret
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Inline base64 secret; supports `${VAR}` expansion
    #[serde(default)]
    pub value: Option<String>,
}

/// Signed token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

fn default_token_ttl_secs() -> u64 {
    300
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Used when the authorization response has no timeout
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Temp file prefix when the caller does not name the upload
    #[serde(default = "default_temp_file_prefix")]
    pub temp_file_prefix: String,
}

impl UploadConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
            temp_file_prefix: default_temp_file_prefix(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    4 * 60 * 60
}

fn default_temp_file_prefix() -> String {
    "upload".to_string()
}

/// Object storage credentials held by this process
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObjectStorageCredentials {
    pub provider: String,
    #[serde(default)]
    pub s3: S3Credentials,
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}
