//! Domain-specific configuration modules

pub mod logging;
pub mod processor;
pub mod queues;
pub mod scheduler;
pub mod serialization;
pub mod store;
pub mod utils;
pub mod workers;

use crate::error::{ConfigError, ConfigResult};
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Drover configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DroverConfig {
    pub store: store::StoreConfig,

    pub queues: queues::QueueConfig,

    pub serialization: serialization::SerializationConfig,

    /// Worker mapping by task type
    pub workers: workers::WorkersConfig,

    pub scheduler: scheduler::SchedulerConfig,

    pub processor: processor::ProcessorConfig,

    pub logging: logging::LoggingConfig,
}

impl DroverConfig {
    /// Validate all domain configurations and the rules that span domains
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.store.validate()?;
        self.queues.validate()?;
        self.serialization.validate()?;
        self.workers.validate()?;
        self.scheduler.validate()?;
        self.processor.validate()?;
        self.logging.validate()?;

        if self.store.backend == store::StoreBackend::Memory
            && self.processor.isolation == processor::IsolationMode::Process
        {
            return Err(ConfigError::DomainError {
                domain: "processor".to_string(),
                message: "process isolation needs a shared store; the memory backend is only usable with isolation: local".to_string(),
            });
        }

        for scheduled in &self.scheduler.tasks {
            self.queues.polling_queue_key(&scheduled.task_type)?;
        }
        for task_type in self.workers.task_types() {
            self.queues.polling_queue_key(task_type)?;
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let mut config = DroverConfig::default();
        config
            .workers
            .insert("demo", workers::WorkerMapping::new("delay"));
        config.scheduler.tasks.push(
            scheduler::ScheduledTaskConfig::every("demo", std::time::Duration::from_secs(60))
                .waiting_for_previous()
                .with_payload(serde_json::json!({ "units_ms": [1000, 4000, 2000] })),
        );
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
