//! Hidden `drover worker` command run inside each worker process

use anyhow::{Context, Result};
use drover_config::DroverConfig;
use drover_core::{TaskId, TaskType};
use drover_execution::WorkerAssignment;
use drover_processor::ProcessorDeps;
use tracing::info;

use crate::workers::builtin_registry;

pub struct WorkerArgs {
    pub task_id: String,
    pub task_type: String,
    pub worker: String,
    pub processor_id: String,
    pub with_job_settings: bool,
}

/// Run one assignment to its terminal event. A worker that fails its task
/// still exits successfully; only host errors make the process fail.
pub async fn run_worker_process(config: DroverConfig, args: WorkerArgs) -> Result<()> {
    let task_id = TaskId::parse(&args.task_id)
        .with_context(|| format!("Invalid task id '{}'", args.task_id))?;
    let assignment = WorkerAssignment {
        task_id,
        task_type: TaskType::new(args.task_type),
        worker: args.worker,
        has_job_settings: args.with_job_settings,
        processor_id: args.processor_id,
    };

    let store = drover_store::connect(&config.store)
        .await
        .context("Worker could not reach the store")?;
    let host = ProcessorDeps::worker_host(store, &config, builtin_registry());

    let outcome = host
        .run(&assignment)
        .await
        .with_context(|| format!("Worker failed to run task {}", task_id))?;
    info!(task_id = %task_id, status = ?outcome.terminal_status(), "Worker process exiting");
    Ok(())
}
