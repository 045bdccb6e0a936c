//! Configuration error types

use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading configuration file
    #[error("Failed to read config file: {0}")]
    FileReadError(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Environment variable error
    #[error("Environment variable error: {0}")]
    EnvError(String),

    /// Domain-specific configuration error
    #[error("Domain configuration error in {domain}: {message}")]
    DomainError { domain: String, message: String },

    /// A lookup made at the point of use found nothing for this key
    #[error("No {what} configured for '{key}'")]
    Missing { what: &'static str, key: String },
}

impl ConfigError {
    pub fn missing(what: &'static str, key: impl Into<String>) -> Self {
        ConfigError::Missing {
            what,
            key: key.into(),
        }
    }
}
