//! Storage error types

use drover_config::ConfigError;
use drover_core::DroverError;
use drover_resilience::Retryable;
use drover_store::StoreError;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl StorageError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Store(e) if e.is_unavailable())
    }

    pub fn serialization(message: impl std::fmt::Display) -> Self {
        StorageError::Serialization(message.to_string())
    }
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        self.is_unavailable()
    }
}

impl From<StorageError> for DroverError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Store(e) => e.into(),
            StorageError::Serialization(msg) => DroverError::Serialization(msg),
            StorageError::Configuration(e) => DroverError::Configuration(e.to_string()),
        }
    }
}
