//! Queue key resolution per task type

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ConfigError, ConfigResult};
use crate::validation::{validate_required_string, Validatable};

const TASK_TYPE_PLACEHOLDER: &str = "{task_type}";

/// Maps task types to the queue key they are polled from.
///
/// Keys are relative to the store key prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Explicit queue keys by task type
    pub keys: BTreeMap<String, String>,

    /// Pattern used for task types without an explicit key
    pub default_pattern: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            keys: BTreeMap::new(),
            default_pattern: Some(format!("queue:{}", TASK_TYPE_PLACEHOLDER)),
        }
    }
}

impl QueueConfig {
    /// Queue key polled for `task_type`
    pub fn polling_queue_key(&self, task_type: &str) -> ConfigResult<String> {
        if let Some(key) = self.keys.get(task_type) {
            return Ok(key.clone());
        }
        match &self.default_pattern {
            Some(pattern) => Ok(pattern.replace(TASK_TYPE_PLACEHOLDER, task_type)),
            None => Err(ConfigError::missing("queue key", task_type)),
        }
    }
}

impl Validatable for QueueConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (task_type, key) in &self.keys {
            validate_required_string(key, &format!("keys.{}", task_type), self.domain_name())?;
        }
        if let Some(pattern) = &self.default_pattern {
            if !pattern.contains(TASK_TYPE_PLACEHOLDER) {
                return Err(self.validation_error(format!(
                    "default_pattern must contain {}",
                    TASK_TYPE_PLACEHOLDER
                )));
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "queues"
    }
}
