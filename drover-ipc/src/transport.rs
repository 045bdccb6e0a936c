//! Typed publishers and receivers over store channels

use drover_store::{StoreProvider, Subscription};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{IpcError, IpcResult};
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Publishes envelopes of `T` on one channel with increasing sequence numbers
pub struct ChannelPublisher<T> {
    store: Arc<dyn StoreProvider>,
    channel: String,
    sender: Uuid,
    sequence: AtomicU64,
    _message: PhantomData<fn(T)>,
}

impl<T: Serialize> ChannelPublisher<T> {
    pub fn new(store: Arc<dyn StoreProvider>, channel: impl Into<String>) -> Self {
        Self {
            store,
            channel: channel.into(),
            sender: Uuid::new_v4(),
            sequence: AtomicU64::new(0),
            _message: PhantomData,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns how many subscribers received the message
    pub async fn publish(&self, message: T) -> IpcResult<usize> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = MessageEnvelope::new(self.sender, sequence, message);
        let bytes =
            serde_json::to_vec(&envelope).map_err(|e| IpcError::SerializationError(e.to_string()))?;
        Ok(self.store.publish(&self.channel, &bytes).await?)
    }
}

/// Receives envelopes of `T`, dropping unreadable and out-of-order messages
pub struct ChannelReceiver<T> {
    subscription: Subscription,
    last_sequence: HashMap<Uuid, u64>,
    _message: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ChannelReceiver<T> {
    /// Subscribe to `channel`; messages published from here on are delivered
    pub async fn subscribe(store: &dyn StoreProvider, channel: &str) -> IpcResult<Self> {
        let subscription = store.subscribe(channel).await?;
        Ok(Self {
            subscription,
            last_sequence: HashMap::new(),
            _message: PhantomData,
        })
    }

    pub fn channel(&self) -> &str {
        self.subscription.channel()
    }

    /// Wait for the next in-order message
    pub async fn receive(&mut self) -> IpcResult<MessageEnvelope<T>> {
        loop {
            let bytes = self
                .subscription
                .next_message()
                .await
                .ok_or(IpcError::ChannelClosed)?;
            if let Some(envelope) = self.accept(&bytes)? {
                return Ok(envelope);
            }
        }
    }

    /// Next in-order message if one is already waiting
    pub fn try_receive(&mut self) -> IpcResult<Option<MessageEnvelope<T>>> {
        while let Some(bytes) = self.subscription.try_next_message() {
            if let Some(envelope) = self.accept(&bytes)? {
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }

    fn accept(&mut self, bytes: &[u8]) -> IpcResult<Option<MessageEnvelope<T>>> {
        let envelope: MessageEnvelope<T> = match serde_json::from_slice(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %self.channel(), "Dropping unreadable message: {}", e);
                return Ok(None);
            }
        };

        if !envelope.is_compatible() {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: IPC_PROTOCOL_VERSION,
                actual: envelope.protocol_version,
            });
        }

        let last = self.last_sequence.entry(envelope.sender).or_insert(0);
        if envelope.sequence <= *last {
            debug!(
                channel = %self.subscription.channel(),
                sequence = envelope.sequence,
                "Dropping out-of-order message"
            );
            return Ok(None);
        }
        *last = envelope.sequence;
        Ok(Some(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WorkerEvent;
    use drover_store::InMemoryStore;

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let store: Arc<dyn StoreProvider> = Arc::new(InMemoryStore::new());
        let mut receiver = ChannelReceiver::<WorkerEvent>::subscribe(store.as_ref(), "events")
            .await
            .unwrap();
        let publisher = ChannelPublisher::new(store.clone(), "events");

        for percent in [14.3, 71.4, 100.0] {
            publisher
                .publish(WorkerEvent::Progress {
                    percent,
                    message: None,
                })
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            let envelope = receiver.receive().await.unwrap();
            seen.push(envelope.sequence);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stale_and_garbage_messages_are_dropped() {
        let store: Arc<dyn StoreProvider> = Arc::new(InMemoryStore::new());
        let mut receiver = ChannelReceiver::<WorkerEvent>::subscribe(store.as_ref(), "events")
            .await
            .unwrap();

        let sender = Uuid::new_v4();
        let newer = MessageEnvelope::new(sender, 5, WorkerEvent::Cancelled);
        let older = MessageEnvelope::new(sender, 4, WorkerEvent::Started { pid: 1 });
        store
            .publish("events", &serde_json::to_vec(&newer).unwrap())
            .await
            .unwrap();
        store.publish("events", b"not json").await.unwrap();
        store
            .publish("events", &serde_json::to_vec(&older).unwrap())
            .await
            .unwrap();

        let first = receiver.try_receive().unwrap().unwrap();
        assert_eq!(first.message, WorkerEvent::Cancelled);
        assert!(receiver.try_receive().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incompatible_version_is_fatal() {
        let store: Arc<dyn StoreProvider> = Arc::new(InMemoryStore::new());
        let mut receiver = ChannelReceiver::<WorkerEvent>::subscribe(store.as_ref(), "events")
            .await
            .unwrap();

        let mut envelope = MessageEnvelope::new(Uuid::new_v4(), 1, WorkerEvent::Cancelled);
        envelope.protocol_version = IPC_PROTOCOL_VERSION + 1;
        store
            .publish("events", &serde_json::to_vec(&envelope).unwrap())
            .await
            .unwrap();

        assert!(receiver.receive().await.unwrap_err().is_fatal());
    }
}
