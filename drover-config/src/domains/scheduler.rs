//! Recurring task submission configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether this host runs the scheduler at all
    pub enabled: bool,

    pub tasks: Vec<ScheduledTaskConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tasks: Vec::new(),
        }
    }
}

/// One recurring task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTaskConfig {
    pub task_type: String,

    /// Fixed submission interval
    #[serde(
        default,
        with = "crate::domains::utils::serde_duration_option",
        rename = "interval_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<Duration>,

    /// Cron expression, as an alternative to `interval_seconds`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    /// Skip a tick while the previously submitted instance is still live
    #[serde(default)]
    pub wait_for_previous_submitted_task_to_complete: bool,

    #[serde(default)]
    pub tenant_id: String,

    /// JSON payload handed to each submitted instance
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ScheduledTaskConfig {
    pub fn every(task_type: impl Into<String>, interval: Duration) -> Self {
        Self {
            task_type: task_type.into(),
            interval: Some(interval),
            cron: None,
            wait_for_previous_submitted_task_to_complete: false,
            tenant_id: String::new(),
            payload: serde_json::Value::Null,
            enabled: true,
        }
    }

    pub fn waiting_for_previous(mut self) -> Self {
        self.wait_for_previous_submitted_task_to_complete = true;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

impl Validatable for SchedulerConfig {
    fn validate(&self) -> ConfigResult<()> {
        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            validate_required_string(&task.task_type, "tasks.task_type", self.domain_name())?;
            if !seen.insert(task.task_type.as_str()) {
                return Err(self.validation_error(format!(
                    "task type '{}' is scheduled more than once",
                    task.task_type
                )));
            }
            match (&task.interval, &task.cron) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(self.validation_error(format!(
                        "'{}' needs exactly one of interval_seconds or cron",
                        task.task_type
                    )));
                }
                (Some(interval), None) if interval.is_zero() => {
                    return Err(self.validation_error(format!(
                        "'{}' interval_seconds must be greater than 0",
                        task.task_type
                    )));
                }
                (None, Some(cron)) => {
                    validate_required_string(cron, "tasks.cron", self.domain_name())?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "scheduler"
    }
}
