//! Task processor (orchestrator) configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Stable identity of this processor; generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processor_id: Option<String>,

    /// Delay between polls of an empty queue
    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "poll_interval_ms")]
    pub poll_interval: Duration,

    /// Bound on acquiring a task's claim lock after dequeue
    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "claim_timeout_ms")]
    pub claim_timeout: Duration,

    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,

    /// Runtime info records expire this long after the last heartbeat
    #[serde(with = "crate::domains::utils::serde_duration_ms", rename = "runtime_info_ttl_ms")]
    pub runtime_info_ttl: Duration,

    /// Upper bound on concurrently supervised workers
    pub max_concurrent_tasks: usize,

    /// Hard deadline for a task when its worker mapping has none
    #[serde(with = "crate::domains::utils::serde_duration", rename = "default_task_timeout_seconds")]
    pub default_task_timeout: Duration,

    /// How long Stop waits for in-flight tasks before cancelling them
    #[serde(with = "crate::domains::utils::serde_duration", rename = "shutdown_grace_period_seconds")]
    pub shutdown_grace_period: Duration,

    /// How long a cancelled worker gets to acknowledge before it is killed
    #[serde(with = "crate::domains::utils::serde_duration", rename = "cancel_grace_period_seconds")]
    pub cancel_grace_period: Duration,

    pub isolation: IsolationMode,

    pub killer: KillerBackend,

    /// Binary started for worker processes; defaults to the current executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_executable: Option<PathBuf>,
}

/// Where workers run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// One child OS process per task
    Process,
    /// A tokio task inside the processor; no crash isolation
    Local,
}

/// Strategy used to tear down a worker's process tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillerBackend {
    /// Put each worker in its own process group and signal the group
    ProcessGroup,
    /// Supervise the worker's descendants directly (Linux)
    Supervisor,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            processor_id: None,
            poll_interval: Duration::from_millis(500),
            claim_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_secs(5),
            runtime_info_ttl: Duration::from_secs(20),
            max_concurrent_tasks: 4,
            default_task_timeout: Duration::from_secs(3600),
            shutdown_grace_period: Duration::from_secs(30),
            cancel_grace_period: Duration::from_secs(10),
            isolation: IsolationMode::Process,
            killer: KillerBackend::ProcessGroup,
            worker_executable: None,
        }
    }
}

impl Validatable for ProcessorConfig {
    fn validate(&self) -> ConfigResult<()> {
        let domain = self.domain_name();
        validate_positive(self.poll_interval.as_millis(), "poll_interval_ms", domain)?;
        validate_positive(self.heartbeat_interval.as_millis(), "heartbeat_interval_ms", domain)?;
        validate_positive(self.max_concurrent_tasks, "max_concurrent_tasks", domain)?;
        validate_positive(
            self.default_task_timeout.as_secs(),
            "default_task_timeout_seconds",
            domain,
        )?;

        if self.runtime_info_ttl <= self.heartbeat_interval {
            return Err(self.validation_error(
                "runtime_info_ttl_ms must be longer than heartbeat_interval_ms",
            ));
        }

        if let Some(id) = &self.processor_id {
            if id.trim().is_empty() || id.contains(':') {
                return Err(self.validation_error(
                    "processor_id cannot be empty or contain ':'",
                ));
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "processor"
    }
}
