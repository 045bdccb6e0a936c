//! Worker mapping per task type

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::validation::{validate_required_string, Validatable};

/// Which worker runs a task type, and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMapping {
    /// Registered worker name
    pub worker: String,

    /// Whether tasks of this type must carry job settings
    #[serde(default)]
    pub has_job_settings: bool,

    /// Overrides the processor's default task timeout
    #[serde(
        default,
        with = "crate::domains::utils::serde_duration_option",
        rename = "timeout_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl WorkerMapping {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            has_job_settings: false,
            timeout: None,
        }
    }

    pub fn with_job_settings(mut self) -> Self {
        self.has_job_settings = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Task type to worker mappings. Only mapped task types are polled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkersConfig(BTreeMap<String, WorkerMapping>);

impl WorkersConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task_type: impl Into<String>, mapping: WorkerMapping) {
        self.0.insert(task_type.into(), mapping);
    }

    pub fn with(mut self, task_type: impl Into<String>, mapping: WorkerMapping) -> Self {
        self.insert(task_type, mapping);
        self
    }

    pub fn worker_for(&self, task_type: &str) -> ConfigResult<&WorkerMapping> {
        self.0
            .get(task_type)
            .ok_or_else(|| ConfigError::missing("worker mapping", task_type))
    }

    pub fn task_types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Validatable for WorkersConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (task_type, mapping) in &self.0 {
            validate_required_string(task_type, "task type", self.domain_name())?;
            validate_required_string(
                &mapping.worker,
                &format!("{}.worker", task_type),
                self.domain_name(),
            )?;
            if mapping.timeout == Some(Duration::ZERO) {
                return Err(self.validation_error(format!(
                    "{}.timeout_seconds must be greater than 0",
                    task_type
                )));
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "workers"
    }
}
