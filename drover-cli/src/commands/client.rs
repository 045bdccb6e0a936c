//! `drover submit`, `drover status` and `drover cancel`

use anyhow::{Context, Result};
use drover_config::{DroverConfig, StoreBackend};
use drover_core::{Task, TaskId, TaskSummary, TaskType};
use drover_ipc::TaskChannels;
use drover_storage::{EntityCodec, TaskRepository, TaskSummaryStore};
use drover_store::KeySpace;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

/// Store-side handles an operator command needs
pub struct Client {
    config: DroverConfig,
    tasks: TaskRepository,
    summaries: TaskSummaryStore,
    channels: TaskChannels,
}

impl Client {
    pub async fn connect(config: DroverConfig) -> Result<Self> {
        if config.store.backend == StoreBackend::Memory {
            warn!("The memory store is private to this process; nothing else will see this command");
        }
        let store = drover_store::connect(&config.store)
            .await
            .context("Failed to connect to the store")?;
        let keys = KeySpace::new(config.store.key_prefix.clone());
        let codec = EntityCodec::new(config.serialization.clone());
        Ok(Self {
            tasks: TaskRepository::new(
                store.clone(),
                keys.clone(),
                config.queues.clone(),
                codec.clone(),
            ),
            summaries: TaskSummaryStore::new(store.clone(), keys.clone(), codec),
            channels: TaskChannels::new(store, keys),
            config,
        })
    }

    pub async fn submit(
        &self,
        task_type: &str,
        payload: Option<&str>,
        settings: Option<&str>,
        tenant: Option<&str>,
    ) -> Result<TaskId> {
        let codec = self.tasks.codec();
        let payload = parse_json("payload", payload)?;
        let mut task = Task::new(task_type, codec.encode_payload(&payload)?);
        if let Some(settings) = settings {
            let settings = parse_json("settings", Some(settings))?;
            task = task.with_job_settings(codec.encode_settings(&settings)?);
        }
        if let Some(tenant) = tenant {
            task = task.with_tenant(tenant);
        }

        self.tasks
            .enqueue(&task)
            .await
            .with_context(|| format!("Failed to submit a '{}' task", task_type))?;
        info!(task_id = %task.id, task_type = %task_type, "Task submitted");
        Ok(task.id)
    }

    /// The summary of a started task, or whether it is still queued
    pub async fn status(&self, task_id: &TaskId) -> Result<TaskState> {
        if let Some(summary) = self.summaries.get(task_id).await? {
            return Ok(TaskState::Known(Box::new(summary)));
        }
        if self.tasks.contains(task_id).await? {
            return Ok(TaskState::Queued);
        }
        Ok(TaskState::Unknown)
    }

    pub async fn summaries(&self) -> Result<Vec<TaskSummary>> {
        let mut summaries = self.summaries.list().await?;
        summaries.sort_by_key(|s| s.created_at);
        Ok(summaries)
    }

    /// Queue length for every task type with a worker mapping
    pub async fn queue_lengths(&self) -> Result<Vec<(String, usize)>> {
        let mut lengths = Vec::new();
        for task_type in self.config.workers.task_types() {
            let length = self.tasks.queue_length(&TaskType::new(task_type)).await?;
            lengths.push((task_type.to_string(), length));
        }
        Ok(lengths)
    }

    pub async fn cancel(&self, task_id: &TaskId, reason: Option<String>) -> Result<()> {
        self.channels
            .request_cancel(task_id, reason)
            .await
            .with_context(|| format!("Failed to request cancellation of {}", task_id))?;
        Ok(())
    }
}

pub enum TaskState {
    Known(Box<TaskSummary>),
    Queued,
    Unknown,
}

fn parse_json(what: &str, value: Option<&str>) -> Result<JsonValue> {
    match value {
        Some(text) => serde_json::from_str(text).with_context(|| format!("Invalid {} JSON", what)),
        None => Ok(JsonValue::Object(Default::default())),
    }
}

fn parse_task_id(value: &str) -> Result<TaskId> {
    TaskId::parse(value).with_context(|| format!("Invalid task id '{}'", value))
}

pub async fn submit_command(
    config: DroverConfig,
    task_type: &str,
    payload: Option<&str>,
    settings: Option<&str>,
    tenant: Option<&str>,
) -> Result<()> {
    let client = Client::connect(config).await?;
    let task_id = client.submit(task_type, payload, settings, tenant).await?;
    println!("{}", task_id);
    Ok(())
}

pub async fn status_command(config: DroverConfig, task_id: Option<&str>) -> Result<()> {
    let client = Client::connect(config).await?;

    if let Some(task_id) = task_id {
        let task_id = parse_task_id(task_id)?;
        match client.status(&task_id).await? {
            TaskState::Known(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
            TaskState::Queued => println!("{}: queued", task_id),
            TaskState::Unknown => anyhow::bail!("No task {} is known", task_id),
        }
        return Ok(());
    }

    for (task_type, length) in client.queue_lengths().await? {
        println!("queue {:<24} {}", task_type, length);
    }
    for summary in client.summaries().await? {
        println!(
            "{}  {:<16} {:<10} {:>5.1}%  {}",
            summary.task_id,
            summary.task_type.as_str(),
            summary.status.as_str(),
            summary.progress,
            summary
                .error
                .as_deref()
                .or(summary.message.as_deref())
                .unwrap_or("")
        );
    }
    Ok(())
}

pub async fn cancel_command(config: DroverConfig, task_id: &str, reason: Option<String>) -> Result<()> {
    let client = Client::connect(config).await?;
    let task_id = parse_task_id(task_id)?;
    client.cancel(&task_id, reason).await?;
    println!("Cancellation requested for {}", task_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_config::StoreConfig;
    use drover_core::TaskStatus;

    #[tokio::test]
    async fn test_submit_then_status() {
        let mut config = DroverConfig::default();
        config.store = StoreConfig::in_memory("cli");
        let client = Client::connect(config).await.unwrap();

        let task_id = client
            .submit("demo", Some(r#"{"units_ms":[10]}"#), None, Some("acme"))
            .await
            .unwrap();
        assert!(matches!(client.status(&task_id).await.unwrap(), TaskState::Queued));
        assert!(matches!(
            client.status(&TaskId::new()).await.unwrap(),
            TaskState::Unknown
        ));

        let task = client.tasks.get_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(task.tenant_id, "acme");

        let summary = TaskSummary::running(&task, "p1", chrono::Utc::now());
        client.summaries.save(&summary).await.unwrap();
        match client.status(&task_id).await.unwrap() {
            TaskState::Known(summary) => assert_eq!(summary.status, TaskStatus::Running),
            _ => panic!("expected a summary"),
        }
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected() {
        let mut config = DroverConfig::default();
        config.store = StoreConfig::in_memory("cli");
        let client = Client::connect(config).await.unwrap();
        assert!(client.submit("demo", Some("{not json"), None, None).await.is_err());
    }
}
