//! Error types for worker execution

use drover_config::ConfigError;
use drover_core::{DroverError, TaskId};
use drover_ipc::IpcError;
use drover_storage::StorageError;
use thiserror::Error;

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("No worker registered as '{0}'")]
    UnknownWorker(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Process error: {0}")]
    Process(String),
}

impl From<ConfigError> for ExecutionError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<ExecutionError> for DroverError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Configuration(msg) => DroverError::Configuration(msg),
            ExecutionError::UnknownWorker(name) => {
                DroverError::Configuration(format!("no worker registered as '{}'", name))
            }
            ExecutionError::Storage(e) => e.into(),
            ExecutionError::Ipc(e) => e.into(),
            ExecutionError::InvalidArgument(msg) => DroverError::InvalidArgument(msg),
            other => DroverError::WorkerFault(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::ErrorKind;

    #[test]
    fn test_error_conversion() {
        let unknown: DroverError = ExecutionError::UnknownWorker("report".to_string()).into();
        assert_eq!(unknown.kind(), ErrorKind::Configuration);

        let spawn: DroverError = ExecutionError::Spawn("no such file".to_string()).into();
        assert_eq!(spawn.kind(), ErrorKind::WorkerFault);

        let ser: DroverError =
            ExecutionError::Storage(StorageError::serialization("bad frame")).into();
        assert_eq!(ser.kind(), ErrorKind::Serialization);
    }
}
