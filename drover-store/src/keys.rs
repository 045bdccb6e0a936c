//! Key and channel naming

use std::fmt::Display;

/// Namespaces every key and channel under a common prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, suffix: impl Display) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    /// A queue key as resolved from queue configuration
    pub fn queue(&self, queue_key: &str) -> String {
        self.key(queue_key)
    }

    /// Hash of tasks by id
    pub fn tasks(&self) -> String {
        self.key("tasks")
    }

    /// Hash of task summaries by task id
    pub fn summaries(&self) -> String {
        self.key("summaries")
    }

    /// Hash of job settings by task id
    pub fn settings(&self) -> String {
        self.key("settings")
    }

    pub fn dead_letter(&self) -> String {
        self.key("dead-letter")
    }

    /// Hash of known processor ids
    pub fn processors(&self) -> String {
        self.key("processors")
    }

    pub fn runtime(&self, processor_id: &str) -> String {
        self.key(format_args!("runtime:{}", processor_id))
    }

    pub fn runtime_tasks(&self, processor_id: &str) -> String {
        self.key(format_args!("runtime:{}:tasks", processor_id))
    }

    pub fn task_lock(&self, task_id: impl Display) -> String {
        self.key(format_args!("lock:task:{}", task_id))
    }

    pub fn schedule_lock(&self, task_type: &str) -> String {
        self.key(format_args!("lock:schedule:{}", task_type))
    }

    /// Id of the most recent scheduled submission for a task type
    pub fn last_scheduled(&self, task_type: &str) -> String {
        self.key(format_args!("scheduled:{}", task_type))
    }

    /// Terminal outcome written by a worker before it exits
    pub fn outcome(&self, task_id: impl Display) -> String {
        self.key(format_args!("outcome:{}", task_id))
    }

    pub fn cancel_flag(&self, task_id: impl Display) -> String {
        self.key(format_args!("cancel:{}", task_id))
    }

    /// Worker to processor progress and outcome events
    pub fn events_channel(&self, task_id: impl Display) -> String {
        self.key(format_args!("events:{}", task_id))
    }

    /// Processor to worker control messages
    pub fn control_channel(&self, task_id: impl Display) -> String {
        self.key(format_args!("control:{}", task_id))
    }

    pub fn completed_channel(&self) -> String {
        self.key("completed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_prefixed() {
        let keys = KeySpace::new("drover");
        assert_eq!(keys.queue("queue:report"), "drover:queue:report");
        assert_eq!(keys.task_lock("abc"), "drover:lock:task:abc");
        assert_eq!(keys.runtime_tasks("p1"), "drover:runtime:p1:tasks");
        assert_eq!(keys.events_channel(42), "drover:events:42");
    }
}
