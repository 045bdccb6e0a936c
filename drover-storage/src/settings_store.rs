//! Per-task job settings

use drover_core::TaskId;
use drover_store::{KeySpace, StoreProvider};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::StorageResult;
use crate::serialization::EntityCodec;

/// Job settings are written with the task at enqueue time and never change
#[derive(Clone)]
pub struct JobSettingsStore {
    store: Arc<dyn StoreProvider>,
    keys: KeySpace,
    codec: EntityCodec,
}

impl JobSettingsStore {
    pub fn new(store: Arc<dyn StoreProvider>, keys: KeySpace, codec: EntityCodec) -> Self {
        Self { store, keys, codec }
    }

    /// Raw framed bytes as submitted
    pub async fn get(&self, id: &TaskId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .store
            .hash_get(&self.keys.settings(), &id.to_string())
            .await?)
    }

    pub async fn load_as<T: DeserializeOwned>(&self, id: &TaskId) -> StorageResult<Option<T>> {
        match self.get(id).await? {
            Some(bytes) => Ok(Some(self.codec.decode_settings(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, id: &TaskId) -> StorageResult<bool> {
        Ok(self
            .store
            .hash_delete(&self.keys.settings(), &id.to_string())
            .await?)
    }
}
