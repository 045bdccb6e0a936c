//! Persistence for Drover
//!
//! Repositories over a [`drover_store::StoreProvider`]: the task queue and
//! task hash, job settings, task summaries and processor runtime info. All
//! stored values go through [`EntityCodec`], which picks a serializer per
//! entity type from configuration and frames the bytes so they can be
//! decoded without knowing which serializer wrote them.

pub mod error;
pub mod runtime_info;
pub mod serialization;
pub mod settings_store;
pub mod summary_store;
pub mod task_repository;

pub use error::{StorageError, StorageResult};
pub use runtime_info::RuntimeInfoRepository;
pub use serialization::{EntityCodec, PayloadSerializer, PAYLOAD_ENTITY, SETTINGS_ENTITY};
pub use settings_store::JobSettingsStore;
pub use summary_store::TaskSummaryStore;
pub use task_repository::TaskRepository;
