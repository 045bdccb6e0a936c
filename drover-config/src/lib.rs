//! Domain-driven configuration management for Drover
//!
//! Configuration is split by functional domain, loaded from YAML, overridden
//! from `DROVER_*` environment variables and validated before use. The
//! accessors on the queue, serialization and worker domains are the lookups
//! the engine performs at the point of use.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    processor::{IsolationMode, KillerBackend, ProcessorConfig},
    queues::QueueConfig,
    scheduler::{ScheduledTaskConfig, SchedulerConfig},
    serialization::{SerializationConfig, SerializerKind},
    store::{StoreBackend, StoreConfig},
    workers::{WorkerMapping, WorkersConfig},
    DroverConfig,
};

pub use domains::utils::{serde_duration, serde_duration_ms};
