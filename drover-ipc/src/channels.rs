//! Per-task channels, the cancel flag and the outcome record

use drover_core::TaskId;
use drover_store::{KeySpace, StoreProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{IpcError, IpcResult};
use crate::protocol::{CompletionNotice, ControlMessage, WorkerEvent};
use crate::transport::{ChannelPublisher, ChannelReceiver};

const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Names and opens every channel and record tied to one task.
///
/// Pub/sub delivery is at most once, so the two facts that must not be
/// lost are also kept as keys: a cancel request sets a flag that a worker
/// checks after subscribing, and a worker writes its terminal outcome
/// before publishing it.
#[derive(Clone)]
pub struct TaskChannels {
    store: Arc<dyn StoreProvider>,
    keys: KeySpace,
    record_ttl: Duration,
}

impl TaskChannels {
    pub fn new(store: Arc<dyn StoreProvider>, keys: KeySpace) -> Self {
        Self {
            store,
            keys,
            record_ttl: DEFAULT_RECORD_TTL,
        }
    }

    /// How long cancel flags and outcome records outlive their task
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn event_publisher(&self, task_id: &TaskId) -> ChannelPublisher<WorkerEvent> {
        ChannelPublisher::new(self.store.clone(), self.keys.events_channel(task_id))
    }

    pub async fn subscribe_events(&self, task_id: &TaskId) -> IpcResult<ChannelReceiver<WorkerEvent>> {
        ChannelReceiver::subscribe(self.store.as_ref(), &self.keys.events_channel(task_id)).await
    }

    pub fn control_publisher(&self, task_id: &TaskId) -> ChannelPublisher<ControlMessage> {
        ChannelPublisher::new(self.store.clone(), self.keys.control_channel(task_id))
    }

    pub async fn subscribe_control(
        &self,
        task_id: &TaskId,
    ) -> IpcResult<ChannelReceiver<ControlMessage>> {
        ChannelReceiver::subscribe(self.store.as_ref(), &self.keys.control_channel(task_id)).await
    }

    pub fn completion_publisher(&self) -> ChannelPublisher<CompletionNotice> {
        ChannelPublisher::new(self.store.clone(), self.keys.completed_channel())
    }

    pub async fn subscribe_completions(&self) -> IpcResult<ChannelReceiver<CompletionNotice>> {
        ChannelReceiver::subscribe(self.store.as_ref(), &self.keys.completed_channel()).await
    }

    /// Set the cancel flag, then tell a running worker
    pub async fn request_cancel(&self, task_id: &TaskId, reason: Option<String>) -> IpcResult<()> {
        self.store
            .set(&self.keys.cancel_flag(task_id), b"1", Some(self.record_ttl))
            .await?;
        let delivered = self
            .control_publisher(task_id)
            .publish(ControlMessage::Cancel { reason })
            .await?;
        debug!(task_id = %task_id, delivered, "Requested cancellation");
        Ok(())
    }

    pub async fn is_cancel_requested(&self, task_id: &TaskId) -> IpcResult<bool> {
        Ok(self
            .store
            .get(&self.keys.cancel_flag(task_id))
            .await?
            .is_some())
    }

    pub async fn write_outcome(&self, task_id: &TaskId, outcome: &WorkerEvent) -> IpcResult<()> {
        let bytes =
            serde_json::to_vec(outcome).map_err(|e| IpcError::SerializationError(e.to_string()))?;
        self.store
            .set(&self.keys.outcome(task_id), &bytes, Some(self.record_ttl))
            .await?;
        Ok(())
    }

    pub async fn read_outcome(&self, task_id: &TaskId) -> IpcResult<Option<WorkerEvent>> {
        match self.store.get(&self.keys.outcome(task_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Drop the cancel flag and outcome record once the task is finalized
    pub async fn clear(&self, task_id: &TaskId) -> IpcResult<()> {
        self.store.delete(&self.keys.cancel_flag(task_id)).await?;
        self.store.delete(&self.keys.outcome(task_id)).await?;
        Ok(())
    }
}
