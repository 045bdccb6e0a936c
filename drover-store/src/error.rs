//! Store error types

use drover_core::DroverError;
use drover_resilience::Retryable;
use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity to the backing store was lost or never established
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Key '{key}' holds a {actual} value, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Timed out after {waited:?} acquiring lock '{key}'")]
    LockTimeout { key: String, waited: Duration },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        self.is_unavailable()
    }
}

impl From<StoreError> for DroverError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => DroverError::StoreUnavailable(msg),
            StoreError::LockTimeout { key, waited } => DroverError::LockTimeout { key, waited },
            StoreError::InvalidArgument(msg) => DroverError::InvalidArgument(msg),
            other => DroverError::Internal(other.to_string()),
        }
    }
}
