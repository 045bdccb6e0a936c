//! Task domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::entity::{base64_bytes, base64_bytes_opt, Entity};

/// Unique identifier for a task (newtype pattern for type safety)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new random task ID
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(value: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(value).map(TaskId)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        TaskId(uuid)
    }
}

/// Task type tag; selects the queue, the worker and the schedule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(name: impl Into<String>) -> Self {
        TaskType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(name: &str) -> Self {
        TaskType(name.to_string())
    }
}

impl From<String> for TaskType {
    fn from(name: String) -> Self {
        TaskType(name)
    }
}

/// A unit of work. Immutable once enqueued.
///
/// `payload` and `job_settings` hold framed, already-serialized bytes; the
/// worker decodes them into its own types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub tenant_id: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, with = "base64_bytes_opt")]
    pub job_settings: Option<Vec<u8>>,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_type: impl Into<TaskType>, payload: Vec<u8>) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            tenant_id: String::new(),
            payload,
            job_settings: None,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_job_settings(mut self, settings: Vec<u8>) -> Self {
        self.job_settings = Some(settings);
        self
    }

    pub fn submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = at;
        self
    }
}

impl Entity for Task {
    const ENTITY_TYPE: &'static str = "task";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = Task::new("report", vec![1]);
        let b = Task::new("report", vec![1]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_task_json_encodes_bytes_as_base64() {
        let task = Task::new("report", b"hello".to_vec())
            .with_tenant("acme")
            .with_job_settings(vec![0, 255]);

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["payload"], "aGVsbG8=");
        assert_eq!(json["job_settings"], "AP8=");
        assert_eq!(json["task_type"], "report");

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_task_id_parse() {
        let id = TaskId::new();
        assert_eq!(TaskId::parse(&id.to_string()).unwrap(), id);
        assert!(TaskId::parse("not-a-uuid").is_err());
    }
}
