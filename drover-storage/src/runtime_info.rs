//! Processor heartbeats and executing-task sets

use chrono::{DateTime, Utc};
use drover_core::{HostInfo, RuntimeInfo, TaskId};
use drover_store::{KeySpace, StoreOp, StoreProvider};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::serialization::EntityCodec;

/// Runtime info for live processors.
///
/// Each processor owns a record that expires `ttl` after its last heartbeat
/// and a hash of the tasks it is executing that expires with it. A registry
/// hash lists every processor id seen so far; ids whose record has expired
/// are pruned when listed.
#[derive(Clone)]
pub struct RuntimeInfoRepository {
    store: Arc<dyn StoreProvider>,
    keys: KeySpace,
    codec: EntityCodec,
    ttl: Duration,
}

impl RuntimeInfoRepository {
    pub fn new(
        store: Arc<dyn StoreProvider>,
        keys: KeySpace,
        codec: EntityCodec,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            codec,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Refresh the processor's record and push out its expiry
    pub async fn heartbeat(&self, processor_id: &str, host: &HostInfo) -> StorageResult<RuntimeInfo> {
        let now = self.store.server_time_utc().await?;
        let info = RuntimeInfo {
            processor_id: processor_id.to_string(),
            host: host.clone(),
            heartbeat_at: now,
            executing: self.executing(processor_id).await?,
        };
        let bytes = self.codec.encode(&info)?;

        self.store
            .run_transaction(vec![
                StoreOp::set(self.keys.runtime(processor_id), bytes, Some(self.ttl)),
                StoreOp::hash_set(
                    self.keys.processors(),
                    processor_id,
                    now.to_rfc3339().into_bytes(),
                ),
                StoreOp::expire(self.keys.runtime_tasks(processor_id), self.ttl),
            ])
            .await?;
        debug!(processor_id, executing = info.executing.len(), "Heartbeat");
        Ok(info)
    }

    pub async fn record_executing(&self, processor_id: &str, task_id: &TaskId) -> StorageResult<()> {
        let now: DateTime<Utc> = self.store.server_time_utc().await?;
        let key = self.keys.runtime_tasks(processor_id);
        self.store
            .run_transaction(vec![
                StoreOp::hash_set(key.clone(), task_id.to_string(), now.to_rfc3339().into_bytes()),
                StoreOp::expire(key, self.ttl),
            ])
            .await?;
        Ok(())
    }

    pub async fn record_completed(&self, processor_id: &str, task_id: &TaskId) -> StorageResult<()> {
        self.store
            .hash_delete(&self.keys.runtime_tasks(processor_id), &task_id.to_string())
            .await?;
        Ok(())
    }

    async fn executing(&self, processor_id: &str) -> StorageResult<BTreeSet<TaskId>> {
        let entries = self
            .store
            .hash_get_all(&self.keys.runtime_tasks(processor_id))
            .await?;
        Ok(entries
            .keys()
            .filter_map(|id| TaskId::parse(id).ok())
            .collect())
    }

    /// The processor's record with its current executing set, if it is live
    pub async fn get(&self, processor_id: &str) -> StorageResult<Option<RuntimeInfo>> {
        let Some(bytes) = self.store.get(&self.keys.runtime(processor_id)).await? else {
            return Ok(None);
        };
        let mut info: RuntimeInfo = self.codec.decode(&bytes)?;
        info.executing = self.executing(processor_id).await?;
        Ok(Some(info))
    }

    pub async fn is_active(&self, processor_id: &str) -> StorageResult<bool> {
        Ok(self
            .store
            .get(&self.keys.runtime(processor_id))
            .await?
            .is_some())
    }

    /// Processors whose heartbeat has not expired
    pub async fn list_active(&self) -> StorageResult<Vec<RuntimeInfo>> {
        let registry = self.store.hash_get_all(&self.keys.processors()).await?;
        let mut active = Vec::with_capacity(registry.len());

        for processor_id in registry.keys() {
            match self.get(processor_id).await {
                Ok(Some(info)) => active.push(info),
                Ok(None) => {
                    debug!(processor_id = %processor_id, "Pruning expired processor");
                    self.store
                        .hash_delete(&self.keys.processors(), processor_id)
                        .await?;
                }
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => warn!(processor_id = %processor_id, "Unreadable runtime info: {}", e),
            }
        }

        active.sort_by(|a, b| a.processor_id.cmp(&b.processor_id));
        Ok(active)
    }

    pub async fn unregister(&self, processor_id: &str) -> StorageResult<()> {
        self.store
            .run_transaction(vec![
                StoreOp::delete(self.keys.runtime(processor_id)),
                StoreOp::delete(self.keys.runtime_tasks(processor_id)),
                StoreOp::hash_delete(self.keys.processors(), processor_id),
            ])
            .await?;
        debug!(processor_id, "Unregistered processor");
        Ok(())
    }
}
