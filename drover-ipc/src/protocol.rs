//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use drover_core::{TaskId, TaskOutput, TaskStatus, TaskType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a worker to the processor supervising it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Worker process is up and about to run the task
    Started { pid: u32 },

    Progress {
        percent: f64,
        message: Option<String>,
    },

    Completed { output: TaskOutput },

    Failed {
        error: String,
        details: Option<String>,
    },

    Cancelled,
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::Completed { .. } | WorkerEvent::Failed { .. } | WorkerEvent::Cancelled
        )
    }

    /// Task status this event leaves the task in, for terminal events
    pub fn terminal_status(&self) -> Option<TaskStatus> {
        match self {
            WorkerEvent::Completed { .. } => Some(TaskStatus::Completed),
            WorkerEvent::Failed { .. } => Some(TaskStatus::Failed),
            WorkerEvent::Cancelled => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }
}

/// Messages sent from a processor to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Stop at the next checkpoint
    Cancel { reason: Option<String> },
}

/// Published once a task reaches a terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub processor_id: String,
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    /// Identifies the publishing instance; sequences are per sender
    pub sender: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    pub fn new(sender: Uuid, sequence: u64, message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            sender,
            sequence,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
