//! IPC error types

use drover_core::DroverError;
use drover_resilience::Retryable;
use drover_store::StoreError;
use thiserror::Error;

pub type IpcResult<T> = Result<T, IpcError>;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// The subscription can deliver no more messages
    #[error("Channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IpcError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IpcError::Store(e) if e.is_unavailable())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, IpcError::ProtocolVersionMismatch { .. })
    }
}

impl Retryable for IpcError {
    fn is_retryable(&self) -> bool {
        IpcError::is_retryable(self)
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

impl From<IpcError> for DroverError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Store(e) => e.into(),
            IpcError::SerializationError(msg) | IpcError::DeserializationError(msg) => {
                DroverError::Serialization(msg)
            }
            other => DroverError::Internal(other.to_string()),
        }
    }
}
