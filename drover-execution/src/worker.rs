//! The worker trait and what a worker sees while it runs

use async_trait::async_trait;
use drover_core::{Task, TaskOutput};
use drover_storage::{EntityCodec, StorageError};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressReporter, ProgressTracker};

/// How a worker's task can end other than successfully
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerTaskError {
    /// The worker observed a cancel request and stopped
    #[error("Task cancelled")]
    Cancelled,

    /// Payload or job settings did not decode into the worker's types
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{message}")]
    Failed {
        message: String,
        details: Option<String>,
    },
}

impl WorkerTaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            details: None,
        }
    }

    pub fn failed_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

impl From<StorageError> for WorkerTaskError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Serialization(msg) => Self::Serialization(msg),
            other => Self::failed(other.to_string()),
        }
    }
}

/// User code that performs one type of task.
///
/// Implementations check [`WorkerContext::checkpoint`] between units of
/// work; cancellation is never forced on a running unit.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    /// Name the worker is registered under in the workers configuration
    fn name(&self) -> &str;

    async fn start_task(&self, ctx: &WorkerContext) -> Result<TaskOutput, WorkerTaskError>;
}

/// Everything a running worker may read or signal
pub struct WorkerContext {
    task: Task,
    job_settings: Option<Vec<u8>>,
    codec: EntityCodec,
    cancellation: CancellationToken,
    progress: ProgressReporter,
}

impl WorkerContext {
    pub fn new(
        task: Task,
        job_settings: Option<Vec<u8>>,
        codec: EntityCodec,
        cancellation: CancellationToken,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            task,
            job_settings,
            codec,
            cancellation,
            progress,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Decode the task payload
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, WorkerTaskError> {
        Ok(self.codec.decode_payload(&self.task.payload)?)
    }

    /// Decode the job settings read when the worker started
    pub fn job_settings<T: DeserializeOwned>(&self) -> Result<Option<T>, WorkerTaskError> {
        match &self.job_settings {
            Some(bytes) => Ok(Some(self.codec.decode_settings(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancellation point between units of work
    pub fn checkpoint(&self) -> Result<(), WorkerTaskError> {
        if self.is_cancelled() {
            Err(WorkerTaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn report_progress(&self, percent: f64, message: Option<String>) -> bool {
        self.progress.report(percent, message)
    }

    pub fn report_tracker(&self, tracker: &ProgressTracker, message: Option<String>) -> bool {
        self.progress.report_tracker(tracker, message)
    }
}

/// Workers available to a host, by name
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<String, Arc<dyn TaskWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Arc<dyn TaskWorker>) {
        self.workers.insert(worker.name().to_string(), worker);
    }

    pub fn with(mut self, worker: Arc<dyn TaskWorker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskWorker>> {
        self.workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }
}
