//! Error taxonomy shared by all Drover crates

use std::time::Duration;
use thiserror::Error;

/// Top-level error categories observable by callers of the engine
#[derive(Debug, Error)]
pub enum DroverError {
    /// Missing queue key, serializer or worker mapping for a task type
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A distributed lock could not be taken within the caller's timeout
    #[error("Timed out after {waited:?} acquiring lock '{key}'")]
    LockTimeout { key: String, waited: Duration },

    /// Payload incompatible with the expected entity type
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Worker crashed, panicked, missed its heartbeat or ran out of time
    #[error("Worker fault: {0}")]
    WorkerFault(String),

    /// Transient loss of connectivity to the backing store
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Internal(String),
}

/// Result type alias for Drover
pub type Result<T> = std::result::Result<T, DroverError>;

/// Category of a [`DroverError`], for callers that branch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    LockTimeout,
    Serialization,
    WorkerFault,
    StoreUnavailable,
    InvalidArgument,
    Internal,
}

impl DroverError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DroverError::Configuration(_) => ErrorKind::Configuration,
            DroverError::LockTimeout { .. } => ErrorKind::LockTimeout,
            DroverError::Serialization(_) => ErrorKind::Serialization,
            DroverError::WorkerFault(_) => ErrorKind::WorkerFault,
            DroverError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            DroverError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DroverError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DroverError::StoreUnavailable(_) | DroverError::LockTimeout { .. }
        )
    }
}
