//! The store provider contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreResult;

/// One step of an atomic transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    /// Append to the tail of a queue
    QueuePush {
        key: String,
        value: Vec<u8>,
    },
    /// Remove every queue entry equal to `value`
    QueueRemove {
        key: String,
        value: Vec<u8>,
    },
    HashSet {
        key: String,
        field: String,
        value: Vec<u8>,
    },
    HashDelete {
        key: String,
        field: String,
    },
    /// Set the expiry of an existing key; a missing key is left alone
    Expire {
        key: String,
        ttl: Duration,
    },
}

impl StoreOp {
    pub fn set(key: impl Into<String>, value: impl Into<Vec<u8>>, ttl: Option<Duration>) -> Self {
        StoreOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        StoreOp::Delete { key: key.into() }
    }

    pub fn queue_push(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        StoreOp::QueuePush {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn queue_remove(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        StoreOp::QueueRemove {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn hash_set(
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        StoreOp::HashSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn hash_delete(key: impl Into<String>, field: impl Into<String>) -> Self {
        StoreOp::HashDelete {
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn expire(key: impl Into<String>, ttl: Duration) -> Self {
        StoreOp::Expire {
            key: key.into(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            StoreOp::Set { key, .. }
            | StoreOp::Delete { key }
            | StoreOp::QueuePush { key, .. }
            | StoreOp::QueueRemove { key, .. }
            | StoreOp::HashSet { key, .. }
            | StoreOp::HashDelete { key, .. }
            | StoreOp::Expire { key, .. } => key,
        }
    }
}

/// Messages received on one pub/sub channel.
///
/// Delivery is at most once: messages published before the subscription was
/// established, or while the connection was down, are not replayed.
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            forwarder: None,
        }
    }

    /// Subscription fed by a background task that is aborted on drop
    pub fn with_forwarder(
        channel: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Vec<u8>>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            forwarder: Some(forwarder),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the channel can deliver no more
    pub async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    pub fn try_next_message(&mut self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish()
    }
}

/// Abstraction over the shared remote store.
///
/// Every method is atomic on its own. Multi-step updates of shared state go
/// through [`StoreProvider::run_transaction`] or a distributed lock.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Append to the tail of a queue; returns the new length
    async fn push_queue(&self, key: &str, value: &[u8]) -> StoreResult<usize>;

    /// Pop the oldest entry. Each entry is handed to exactly one caller.
    async fn pop_queue(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// The oldest entry, left in place
    async fn peek_queue(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Remove one entry equal to `value` from `from`, appending it to `to`
    /// in the same step when given.
    ///
    /// `false` means no such entry was queued, so of several callers racing
    /// for one entry exactly one wins.
    async fn take_queue_entry(
        &self,
        from: &str,
        value: &[u8],
        to: Option<&str>,
    ) -> StoreResult<bool>;

    async fn queue_len(&self, key: &str) -> StoreResult<usize>;

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<()>;

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>>;

    /// Apply all operations or none of them
    async fn run_transaction(&self, ops: Vec<StoreOp>) -> StoreResult<()>;

    /// Set `key` only if it does not exist, with a mandatory expiry
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool>;

    /// Delete `key` only if it currently holds `expected`
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StoreResult<bool>;

    /// Reset the expiry of `key` only if it currently holds `expected`
    async fn refresh_if_equals(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Fan a message out to current subscribers; returns how many received it
    async fn publish(&self, channel: &str, message: &[u8]) -> StoreResult<usize>;

    /// The subscription is active once this returns
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;

    async fn server_time_utc(&self) -> StoreResult<DateTime<Utc>>;
}
