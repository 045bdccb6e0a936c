//! Backing store configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, validate_url, Validatable};

/// Shared store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backend implementation to use
    pub backend: StoreBackend,

    /// Connection URL for remote backends
    pub url: String,

    /// Prefix applied to every key and channel
    pub key_prefix: String,

    /// Connection timeout
    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,

    /// Safety-net expiry applied to every distributed lock
    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "lock_ttl_ms")]
    pub lock_ttl: Duration,

    /// How often a blocked lock acquisition polls the store
    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "lock_retry_interval_ms")]
    pub lock_retry_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; only usable with local worker isolation
    Memory,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "drover".to_string(),
            connect_timeout: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(30),
            lock_retry_interval: Duration::from_millis(50),
        }
    }
}

impl StoreConfig {
    /// In-memory store with short lock timings, for tests and local runs
    pub fn in_memory(key_prefix: impl Into<String>) -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: String::new(),
            key_prefix: key_prefix.into(),
            lock_ttl: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(10),
            ..Self::default()
        }
    }
}

impl Validatable for StoreConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.key_prefix, "key_prefix", self.domain_name())?;
        validate_positive(self.lock_ttl.as_millis(), "lock_ttl_ms", self.domain_name())?;
        validate_positive(
            self.lock_retry_interval.as_millis(),
            "lock_retry_interval_ms",
            self.domain_name(),
        )?;

        if self.lock_retry_interval >= self.lock_ttl {
            return Err(self.validation_error("lock_retry_interval_ms must be shorter than lock_ttl_ms"));
        }

        if self.backend == StoreBackend::Redis {
            validate_url(&self.url, &["redis", "rediss", "redis+unix"], "url", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "store"
    }
}
