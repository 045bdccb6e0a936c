//! Drives schedule runners from cron and interval jobs

use drover_config::SchedulerConfig;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::runner::{ScheduleRunner, ScheduleStatus, SchedulerDeps, TickOutcome};

/// One `tokio-cron-scheduler` job per enabled scheduled type
pub struct TaskScheduler {
    runners: Vec<Arc<ScheduleRunner>>,
    scheduler: Mutex<Option<JobScheduler>>,
    is_running: AtomicBool,
}

impl TaskScheduler {
    pub fn new(config: &SchedulerConfig, deps: SchedulerDeps) -> Self {
        let runners = config
            .tasks
            .iter()
            .filter(|task| {
                if !task.enabled {
                    debug!(task_type = %task.task_type, "Skipping disabled schedule");
                }
                task.enabled
            })
            .map(|task| Arc::new(ScheduleRunner::new(task.clone(), deps.clone())))
            .collect();
        Self {
            runners,
            scheduler: Mutex::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn runners(&self) -> &[Arc<ScheduleRunner>] {
        &self.runners
    }

    pub fn statuses(&self) -> Vec<ScheduleStatus> {
        self.runners.iter().map(|runner| runner.status()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Tick every runner once, outside the timers
    pub async fn tick_all(&self) -> Vec<Option<TickOutcome>> {
        let mut outcomes = Vec::with_capacity(self.runners.len());
        for runner in &self.runners {
            outcomes.push(runner.run_tick().await);
        }
        outcomes
    }

    pub async fn start(&self) -> SchedulerResult<()> {
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        info!("Starting task scheduler with {} schedules", self.runners.len());

        let scheduler = JobScheduler::new().await.map_err(|e| {
            error!("Failed to create JobScheduler: {}", e);
            SchedulerError::Internal(format!("Failed to create JobScheduler: {}", e))
        })?;

        for runner in &self.runners {
            let job = Self::job_for(runner.clone())?;
            scheduler.add(job).await?;
            debug!(task_type = %runner.task_type(), "Added schedule");
        }

        scheduler.start().await?;
        *guard = Some(scheduler);
        self.is_running.store(true, Ordering::Relaxed);
        info!("Task scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> SchedulerResult<()> {
        let Some(mut scheduler) = self.scheduler.lock().await.take() else {
            warn!("Scheduler is not running");
            return Err(SchedulerError::NotRunning);
        };
        scheduler.shutdown().await?;
        self.is_running.store(false, Ordering::Relaxed);
        info!("Task scheduler stopped");
        Ok(())
    }

    fn job_for(runner: Arc<ScheduleRunner>) -> SchedulerResult<Job> {
        let config = runner.config().clone();
        let invalid = |message: String| SchedulerError::InvalidSchedule {
            task_type: config.task_type.clone(),
            message,
        };

        let tick = move |_job_id: Uuid, _scheduler: JobScheduler| {
            let runner = runner.clone();
            Box::pin(async move {
                runner.run_tick().await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        };

        match (&config.interval, &config.cron) {
            (Some(interval), None) => {
                Job::new_repeated_async(*interval, tick).map_err(|e| invalid(e.to_string()))
            }
            (None, Some(cron)) => Job::new_async(cron.as_str(), tick)
                .map_err(|e| invalid(format!("invalid cron expression '{}': {}", cron, e))),
            _ => Err(invalid(
                "needs exactly one of interval_seconds or cron".to_string(),
            )),
        }
    }
}
