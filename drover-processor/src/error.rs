//! Processor error types

use drover_config::ConfigError;
use drover_core::DroverError;
use drover_execution::ExecutionError;
use drover_ipc::IpcError;
use drover_resilience::ShutdownError;
use drover_storage::StorageError;
use drover_store::StoreError;
use thiserror::Error;

use crate::state::ProcessorState;

pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Processor cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: ProcessorState,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl From<ConfigError> for ProcessorError {
    fn from(err: ConfigError) -> Self {
        ProcessorError::Configuration(err.to_string())
    }
}

impl From<ProcessorError> for DroverError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Configuration(msg) => DroverError::Configuration(msg),
            ProcessorError::Store(e) => e.into(),
            ProcessorError::Storage(e) => e.into(),
            ProcessorError::Ipc(e) => e.into(),
            ProcessorError::Execution(e) => e.into(),
            other => DroverError::Internal(other.to_string()),
        }
    }
}
