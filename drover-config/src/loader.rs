//! Loading YAML configuration and applying `DROVER_*` environment overrides

use crate::domains::logging::{LogFormat, LogLevel};
use crate::domains::store::StoreBackend;
use crate::domains::DroverConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_PREFIX: &str = "DROVER";

/// Builds a validated [`DroverConfig`].
///
/// File values are read first, then any `<PREFIX>_<NAME>` variable replaces
/// the matching field, and the result is validated as a whole.
pub struct ConfigLoader {
    prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<DroverConfig> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());
        let config = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        self.finish(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env(&self) -> ConfigResult<DroverConfig> {
        self.finish(DroverConfig::default())
    }

    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<DroverConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn finish(&self, mut config: DroverConfig) -> ConfigResult<DroverConfig> {
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut DroverConfig) -> ConfigResult<()> {
        let store = &mut config.store;
        if let Some(backend) = self.parsed::<StoreBackend>("STORE_BACKEND")? {
            store.backend = backend;
        }
        if let Some(url) = self.var("STORE_URL") {
            store.url = url;
        }
        if let Some(prefix) = self.var("STORE_KEY_PREFIX") {
            store.key_prefix = prefix;
        }
        if let Some(ms) = self.parsed::<u64>("LOCK_TTL_MS")? {
            store.lock_ttl = Duration::from_millis(ms);
        }

        let processor = &mut config.processor;
        if let Some(id) = self.var("PROCESSOR_ID") {
            processor.processor_id = Some(id);
        }
        if let Some(max) = self.parsed("MAX_CONCURRENT_TASKS")? {
            processor.max_concurrent_tasks = max;
        }
        if let Some(ms) = self.parsed::<u64>("POLL_INTERVAL_MS")? {
            processor.poll_interval = Duration::from_millis(ms);
        }
        if let Some(exe) = self.var("WORKER_EXECUTABLE") {
            processor.worker_executable = Some(exe.into());
        }

        if let Some(level) = self.parsed::<LogLevel>("LOG_LEVEL")? {
            config.logging.level = level;
        }
        if let Some(format) = self.parsed::<LogFormat>("LOG_FORMAT")? {
            config.logging.format = format;
        }
        Ok(())
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    fn var(&self, name: &str) -> Option<String> {
        std::env::var(self.var_name(name)).ok()
    }

    fn parsed<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.var(name)
            .map(|raw| {
                raw.parse().map_err(|e| {
                    ConfigError::EnvError(format!("Invalid {}: {}", self.var_name(name), e))
                })
            })
            .transpose()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
