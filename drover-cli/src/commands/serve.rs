//! `drover serve`: processor plus scheduler until Ctrl+C

use anyhow::{Context, Result};
use drover_config::DroverConfig;
use drover_processor::{ProcessorDeps, TaskProcessor};
use drover_scheduler::{SchedulerDeps, TaskScheduler};
use std::path::Path;
use tokio::signal;
use tracing::{info, warn};

use crate::workers::builtin_registry;

pub async fn serve_command(
    config: DroverConfig,
    config_path: Option<&Path>,
    no_scheduler: bool,
) -> Result<()> {
    let deps = ProcessorDeps::connect(&config, builtin_registry(), config_path)
        .await
        .context("Failed to set up the task processor")?;

    let scheduler = if config.scheduler.enabled && !no_scheduler {
        let scheduler = TaskScheduler::new(
            &config.scheduler,
            SchedulerDeps {
                store: deps.store.clone(),
                keys: deps.keys.clone(),
                locks: deps.locks.clone(),
                tasks: deps.tasks.clone(),
                summaries: deps.summaries.clone(),
                runtime: deps.runtime.clone(),
            },
        );
        Some(scheduler)
    } else {
        None
    };

    let processor = TaskProcessor::new(&config, deps);
    processor
        .start()
        .await
        .context("Failed to start the task processor")?;

    if let Some(scheduler) = &scheduler {
        scheduler
            .start()
            .await
            .context("Failed to start the scheduler")?;
        info!(schedules = scheduler.runners().len(), "Scheduler started");
    }

    info!(processor_id = %processor.processor_id(), "Drover is running; press Ctrl+C to stop");
    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    if let Some(scheduler) = &scheduler {
        if let Err(e) = scheduler.stop().await {
            warn!("Failed to stop the scheduler: {}", e);
        }
        for status in scheduler.statuses() {
            info!(
                task_type = %status.task_type,
                submitted = status.submitted,
                skipped = status.skipped,
                failures = status.failures,
                "Schedule summary"
            );
        }
    }

    processor
        .stop()
        .await
        .context("Failed to stop the task processor")?;
    processor.wait_stopped().await;
    Ok(())
}
