//! Workers built into the `drover` binary

use async_trait::async_trait;
use drover_core::TaskOutput;
use drover_execution::{ProgressTracker, TaskWorker, WorkerContext, WorkerRegistry, WorkerTaskError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Every worker this binary can run
pub fn builtin_registry() -> WorkerRegistry {
    WorkerRegistry::new()
        .with(Arc::new(DelayWorker))
        .with(Arc::new(EchoWorker))
        .with(Arc::new(FailWorker))
}

#[derive(Debug, Deserialize)]
struct DelayPayload {
    units_ms: Vec<u64>,
}

/// Sleeps through each unit in turn, reporting progress weighted by
/// duration. Cancellation is honoured between and during units.
pub struct DelayWorker;

#[async_trait]
impl TaskWorker for DelayWorker {
    fn name(&self) -> &str {
        "delay"
    }

    async fn start_task(&self, ctx: &WorkerContext) -> Result<TaskOutput, WorkerTaskError> {
        let payload: DelayPayload = ctx.payload()?;
        let mut tracker = ProgressTracker::for_units(payload.units_ms.iter().map(|ms| *ms as f64));
        let total: u64 = payload.units_ms.iter().sum();

        for (index, millis) in payload.units_ms.iter().enumerate() {
            ctx.checkpoint()?;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(*millis)) => {}
                _ = ctx.cancelled() => return Err(WorkerTaskError::Cancelled),
            }
            tracker.advance(*millis as f64);
            ctx.report_tracker(
                &tracker,
                Some(format!("unit {} of {}", index + 1, payload.units_ms.len())),
            );
        }

        Ok(TaskOutput::new()
            .with_message(format!("slept {}ms", total))
            .with_value("units", payload.units_ms.len().to_string()))
    }
}

/// Reports the payload back as its output
pub struct EchoWorker;

#[async_trait]
impl TaskWorker for EchoWorker {
    fn name(&self) -> &str {
        "echo"
    }

    async fn start_task(&self, ctx: &WorkerContext) -> Result<TaskOutput, WorkerTaskError> {
        let payload: serde_json::Value = ctx.payload()?;
        let mut output = TaskOutput::new().with_message(payload.to_string());
        if let Some(settings) = ctx.job_settings::<serde_json::Value>()? {
            output = output.with_value("settings", settings.to_string());
        }
        Ok(output)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FailPayload {
    message: Option<String>,
    details: Option<String>,
}

/// Always fails, with the message from its payload
pub struct FailWorker;

#[async_trait]
impl TaskWorker for FailWorker {
    fn name(&self) -> &str {
        "fail"
    }

    async fn start_task(&self, ctx: &WorkerContext) -> Result<TaskOutput, WorkerTaskError> {
        let payload: FailPayload = ctx.payload().unwrap_or_default();
        let message = payload.message.unwrap_or_else(|| "requested failure".to_string());
        Err(match payload.details {
            Some(details) => WorkerTaskError::failed_with_details(message, details),
            None => WorkerTaskError::failed(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["delay", "echo", "fail"]);
    }
}
