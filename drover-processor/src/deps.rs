//! Everything a processor talks to, built explicitly

use drover_config::{DroverConfig, IsolationMode};
use drover_execution::{
    LocalWorkerLauncher, ProcessWorkerLauncher, WorkerHost, WorkerLauncher, WorkerRegistry,
};
use drover_ipc::TaskChannels;
use drover_storage::{
    EntityCodec, JobSettingsStore, RuntimeInfoRepository, TaskRepository, TaskSummaryStore,
};
use drover_store::{KeySpace, LockManager, StoreProvider};
use std::path::Path;
use std::sync::Arc;

use crate::error::ProcessorResult;

/// Store, repositories and worker launcher for one processor
#[derive(Clone)]
pub struct ProcessorDeps {
    pub store: Arc<dyn StoreProvider>,
    pub keys: KeySpace,
    pub locks: LockManager,
    pub tasks: TaskRepository,
    pub settings: JobSettingsStore,
    pub summaries: TaskSummaryStore,
    pub runtime: RuntimeInfoRepository,
    pub channels: TaskChannels,
    pub launcher: Arc<dyn WorkerLauncher>,
}

impl ProcessorDeps {
    pub fn new(
        store: Arc<dyn StoreProvider>,
        config: &DroverConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        let keys = KeySpace::new(config.store.key_prefix.clone());
        let codec = EntityCodec::new(config.serialization.clone());
        Self {
            locks: LockManager::from_config(store.clone(), &config.store),
            tasks: TaskRepository::new(
                store.clone(),
                keys.clone(),
                config.queues.clone(),
                codec.clone(),
            ),
            settings: JobSettingsStore::new(store.clone(), keys.clone(), codec.clone()),
            summaries: TaskSummaryStore::new(store.clone(), keys.clone(), codec.clone()),
            runtime: RuntimeInfoRepository::new(
                store.clone(),
                keys.clone(),
                codec,
                config.processor.runtime_info_ttl,
            ),
            channels: TaskChannels::new(store.clone(), keys.clone()),
            keys,
            store,
            launcher,
        }
    }

    /// Worker host over `store`, as run by worker processes and local workers
    pub fn worker_host(
        store: Arc<dyn StoreProvider>,
        config: &DroverConfig,
        registry: WorkerRegistry,
    ) -> WorkerHost {
        let keys = KeySpace::new(config.store.key_prefix.clone());
        let codec = EntityCodec::new(config.serialization.clone());
        WorkerHost::new(
            TaskRepository::new(
                store.clone(),
                keys.clone(),
                config.queues.clone(),
                codec.clone(),
            ),
            JobSettingsStore::new(store.clone(), keys.clone(), codec),
            TaskChannels::new(store, keys),
            registry,
        )
    }

    /// Connect to the configured store and pick the launcher for the
    /// configured isolation mode. `config_path` is handed to worker
    /// processes so they load the same configuration.
    pub async fn connect(
        config: &DroverConfig,
        registry: WorkerRegistry,
        config_path: Option<&Path>,
    ) -> ProcessorResult<Self> {
        let store = drover_store::connect(&config.store).await?;
        let launcher: Arc<dyn WorkerLauncher> = match config.processor.isolation {
            IsolationMode::Local => Arc::new(LocalWorkerLauncher::new(Self::worker_host(
                store.clone(),
                config,
                registry,
            ))),
            IsolationMode::Process => {
                let mut launcher = ProcessWorkerLauncher::from_config(&config.processor)?
                    .with_env("DROVER_STORE_URL", config.store.url.clone())
                    .with_env("DROVER_STORE_KEY_PREFIX", config.store.key_prefix.clone());
                if let Some(path) = config_path {
                    launcher = launcher.with_config_path(path);
                }
                Arc::new(launcher)
            }
        };
        Ok(Self::new(store, config, launcher))
    }
}
