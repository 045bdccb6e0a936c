//! Task status and the persisted summary record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::entity::Entity;
use crate::task::{Task, TaskId, TaskType};

/// Externally observable task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Check if the task is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a worker hands back on success
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub message: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl TaskOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Progress and result record keyed by task id.
///
/// Created when a processor claims the task, updated while it runs and
/// finalized once a terminal status is reached. Only the holder of the task's
/// claim lock writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub tenant_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub message: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub error: Option<String>,
    pub error_details: Option<String>,
    pub processor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskSummary {
    pub fn running(task: &Task, processor_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            tenant_id: task.tenant_id.clone(),
            status: TaskStatus::Running,
            progress: 0.0,
            message: None,
            data: BTreeMap::new(),
            error: None,
            error_details: None,
            processor_id: Some(processor_id.into()),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Apply a progress report. Returns false if the summary is terminal or
    /// the value would move progress backwards.
    pub fn record_progress(
        &mut self,
        percent: f64,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() || !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent < self.progress {
            return false;
        }
        self.progress = percent;
        if message.is_some() {
            self.message = message;
        }
        self.updated_at = now;
        true
    }

    pub fn complete(&mut self, output: TaskOutput, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.progress = 100.0;
        if output.message.is_some() {
            self.message = output.message;
        }
        self.data.extend(output.data);
        self.finish(now);
    }

    pub fn fail(
        &mut self,
        error: impl Into<String>,
        details: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.error_details = details;
        self.finish(now);
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.finish(now);
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.finished_at = Some(now);
    }
}

impl Entity for TaskSummary {
    const ENTITY_TYPE: &'static str = "task_summary";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> TaskSummary {
        let task = Task::new("report", Vec::new());
        TaskSummary::running(&task, "proc-1", Utc::now())
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut s = summary();
        assert!(s.record_progress(40.0, None, Utc::now()));
        assert!(!s.record_progress(20.0, None, Utc::now()));
        assert_eq!(s.progress, 40.0);
        assert!(s.record_progress(250.0, Some("done".into()), Utc::now()));
        assert_eq!(s.progress, 100.0);
        assert!(!s.record_progress(f64::NAN, None, Utc::now()));
    }

    #[test]
    fn test_no_progress_after_terminal() {
        let mut s = summary();
        s.cancel(Utc::now());
        assert!(!s.record_progress(50.0, None, Utc::now()));
        assert_eq!(s.status, TaskStatus::Cancelled);
        assert!(s.finished_at.is_some());
    }

    #[test]
    fn test_complete_merges_output() {
        let mut s = summary();
        s.complete(
            TaskOutput::new().with_message("ok").with_value("rows", "12"),
            Utc::now(),
        );
        assert_eq!(s.status, TaskStatus::Completed);
        assert_eq!(s.progress, 100.0);
        assert_eq!(s.data.get("rows").map(String::as_str), Some("12"));
    }

    #[test]
    fn test_summary_survives_binary_encoding() {
        let mut s = summary();
        s.fail("worker exited", Some("status 137".into()), Utc::now());
        let config = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(&s, config).unwrap();
        let (back, _): (TaskSummary, usize) =
            bincode::serde::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(back, s);
    }
}
