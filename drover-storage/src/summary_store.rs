//! Task summaries

use drover_core::{TaskId, TaskSummary};
use drover_store::{KeySpace, StoreProvider};
use std::sync::Arc;
use tracing::warn;

use crate::error::StorageResult;
use crate::serialization::EntityCodec;

/// Summaries keyed by task id.
///
/// Only the holder of a task's claim lock writes its summary, so whole-record
/// writes never race.
#[derive(Clone)]
pub struct TaskSummaryStore {
    store: Arc<dyn StoreProvider>,
    keys: KeySpace,
    codec: EntityCodec,
}

impl TaskSummaryStore {
    pub fn new(store: Arc<dyn StoreProvider>, keys: KeySpace, codec: EntityCodec) -> Self {
        Self { store, keys, codec }
    }

    pub async fn save(&self, summary: &TaskSummary) -> StorageResult<()> {
        let bytes = self.codec.encode(summary)?;
        self.store
            .hash_set(&self.keys.summaries(), &summary.task_id.to_string(), &bytes)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &TaskId) -> StorageResult<Option<TaskSummary>> {
        match self
            .store
            .hash_get(&self.keys.summaries(), &id.to_string())
            .await?
        {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All readable summaries, oldest first
    pub async fn list(&self) -> StorageResult<Vec<TaskSummary>> {
        let entries = self.store.hash_get_all(&self.keys.summaries()).await?;
        let mut summaries: Vec<TaskSummary> = entries
            .into_iter()
            .filter_map(|(id, bytes)| match self.codec.decode(&bytes) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    warn!(task_id = %id, "Skipping unreadable summary: {}", e);
                    None
                }
            })
            .collect();
        summaries.sort_by_key(|summary| summary.created_at);
        Ok(summaries)
    }

    pub async fn remove(&self, id: &TaskId) -> StorageResult<bool> {
        Ok(self
            .store
            .hash_delete(&self.keys.summaries(), &id.to_string())
            .await?)
    }
}
