//! Scheduler error types

use drover_core::DroverError;
use drover_storage::StorageError;
use drover_store::StoreError;
use thiserror::Error;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Internal scheduler error: {0}")]
    Internal(String),

    #[error("Invalid schedule for '{task_type}': {message}")]
    InvalidSchedule { task_type: String, message: String },

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<tokio_cron_scheduler::JobSchedulerError> for SchedulerError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

impl From<SchedulerError> for DroverError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidSchedule { .. } => DroverError::Configuration(err.to_string()),
            SchedulerError::Store(e) => e.into(),
            SchedulerError::Storage(e) => e.into(),
            other => DroverError::Internal(other.to_string()),
        }
    }
}
