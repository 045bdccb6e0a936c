//! Task queue and task hash

use drover_config::QueueConfig;
use drover_core::{Task, TaskId, TaskType};
use drover_store::{KeySpace, StoreOp, StoreProvider};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::serialization::EntityCodec;

/// Per-type FIFO queues plus a hash of every known task by id.
///
/// The queue entry and the hash entry hold identical bytes, so a task can be
/// taken out of its queue by value.
#[derive(Clone)]
pub struct TaskRepository {
    store: Arc<dyn StoreProvider>,
    keys: KeySpace,
    queues: QueueConfig,
    codec: EntityCodec,
}

impl TaskRepository {
    pub fn new(
        store: Arc<dyn StoreProvider>,
        keys: KeySpace,
        queues: QueueConfig,
        codec: EntityCodec,
    ) -> Self {
        Self {
            store,
            keys,
            queues,
            codec,
        }
    }

    pub fn codec(&self) -> &EntityCodec {
        &self.codec
    }

    /// Full store key of the queue for `task_type`
    pub fn queue_key(&self, task_type: &TaskType) -> StorageResult<String> {
        let key = self.queues.polling_queue_key(task_type.as_str())?;
        Ok(self.keys.queue(&key))
    }

    /// Store the task, its job settings and its queue entry in one transaction
    pub async fn enqueue(&self, task: &Task) -> StorageResult<()> {
        let queue = self.queue_key(&task.task_type)?;
        let encoded = self.codec.encode(task)?;
        let id = task.id.to_string();

        let mut ops = vec![StoreOp::hash_set(self.keys.tasks(), id.clone(), encoded.clone())];
        if let Some(settings) = &task.job_settings {
            ops.push(StoreOp::hash_set(self.keys.settings(), id, settings.clone()));
        }
        ops.push(StoreOp::queue_push(queue, encoded));

        self.store.run_transaction(ops).await?;
        debug!(task_id = %task.id, task_type = %task.task_type, "Enqueued task");
        Ok(())
    }

    /// Take the oldest task of `task_type`.
    ///
    /// The head is read, decoded, then taken by value, so an entry leaves its
    /// queue only in the same store step that hands it to this caller or to
    /// the dead-letter queue. An undecodable entry is dead-lettered, its hash
    /// entries dropped, and reported as a serialization error.
    pub async fn dequeue(&self, task_type: &TaskType) -> StorageResult<Option<Task>> {
        let queue = self.queue_key(task_type)?;
        loop {
            let Some(bytes) = self.store.peek_queue(&queue).await? else {
                return Ok(None);
            };

            match self.codec.decode::<Task>(&bytes) {
                Ok(task) => {
                    if self.store.take_queue_entry(&queue, &bytes, None).await? {
                        return Ok(Some(task));
                    }
                }
                Err(e) => {
                    let dead_letter = self.keys.dead_letter();
                    if self
                        .store
                        .take_queue_entry(&queue, &bytes, Some(dead_letter.as_str()))
                        .await?
                    {
                        warn!(queue = %queue, "Moved undecodable queue entry to dead letter: {}", e);
                        if let Err(cleanup) = self.forget_entries_holding(&bytes).await {
                            warn!(
                                queue = %queue,
                                "Failed to drop hash entries of dead-lettered task: {}", cleanup
                            );
                        }
                        return Err(e);
                    }
                }
            }
            // another consumer took the head first
        }
    }

    /// Drop task and settings hash fields whose task bytes equal `bytes`
    async fn forget_entries_holding(&self, bytes: &[u8]) -> StorageResult<()> {
        let tasks = self.store.hash_get_all(&self.keys.tasks()).await?;
        let ops: Vec<StoreOp> = tasks
            .into_iter()
            .filter(|(_, value)| value.as_slice() == bytes)
            .flat_map(|(field, _)| {
                [
                    StoreOp::hash_delete(self.keys.tasks(), field.clone()),
                    StoreOp::hash_delete(self.keys.settings(), field),
                ]
            })
            .collect();
        if !ops.is_empty() {
            self.store.run_transaction(ops).await?;
        }
        Ok(())
    }

    pub async fn get_by_id(&self, id: &TaskId) -> StorageResult<Option<Task>> {
        match self.store.hash_get(&self.keys.tasks(), &id.to_string()).await? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether the task is still known, queued or running
    pub async fn contains(&self, id: &TaskId) -> StorageResult<bool> {
        Ok(self
            .store
            .hash_get(&self.keys.tasks(), &id.to_string())
            .await?
            .is_some())
    }

    /// Forget a task: hash entry, job settings and any queue entry.
    ///
    /// Returns `false` when the task was not known.
    pub async fn remove(&self, id: &TaskId) -> StorageResult<bool> {
        let field = id.to_string();
        let Some(bytes) = self.store.hash_get(&self.keys.tasks(), &field).await? else {
            return Ok(false);
        };

        let mut ops = vec![
            StoreOp::hash_delete(self.keys.tasks(), field.clone()),
            StoreOp::hash_delete(self.keys.settings(), field),
        ];
        match self.codec.decode::<Task>(&bytes) {
            Ok(task) => ops.push(StoreOp::queue_remove(self.queue_key(&task.task_type)?, bytes)),
            Err(e) => warn!(task_id = %id, "Removing undecodable task: {}", e),
        }

        self.store.run_transaction(ops).await?;
        debug!(task_id = %id, "Removed task");
        Ok(true)
    }

    pub async fn queue_length(&self, task_type: &TaskType) -> StorageResult<usize> {
        let queue = self.queue_key(task_type)?;
        Ok(self.store.queue_len(&queue).await?)
    }
}
