//! Per-type scheduling decisions

use chrono::{DateTime, Utc};
use drover_config::ScheduledTaskConfig;
use drover_core::{Task, TaskId, TaskType};
use drover_storage::{RuntimeInfoRepository, TaskRepository, TaskSummaryStore};
use drover_store::{KeySpace, LockManager, StoreError, StoreProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// Store handles a scheduler needs
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn StoreProvider>,
    pub keys: KeySpace,
    pub locks: LockManager,
    pub tasks: TaskRepository,
    pub summaries: TaskSummaryStore,
    pub runtime: RuntimeInfoRepository,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Submitted(TaskId),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another scheduler holds this type's schedule lock
    LockContended,
    /// The last submitted instance has not reached a terminal state
    PreviousStillLive(TaskId),
}

/// Counters and the most recent decision for one scheduled type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleStatus {
    pub task_type: TaskType,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_outcome: Option<TickOutcome>,
    pub submitted: u64,
    pub skipped: u64,
    pub failures: u64,
}

impl ScheduleStatus {
    fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            last_tick: None,
            last_outcome: None,
            submitted: 0,
            skipped: 0,
            failures: 0,
        }
    }
}

/// Decides, tick by tick, whether to submit a new instance of one type.
///
/// Every tick runs under the type's schedule lock, taken with a zero
/// timeout, so concurrent schedulers on other hosts skip instead of racing
/// on the wait-for-previous check.
pub struct ScheduleRunner {
    config: ScheduledTaskConfig,
    task_type: TaskType,
    deps: SchedulerDeps,
    status: Mutex<ScheduleStatus>,
}

impl ScheduleRunner {
    pub fn new(config: ScheduledTaskConfig, deps: SchedulerDeps) -> Self {
        let task_type = TaskType::new(config.task_type.clone());
        Self {
            status: Mutex::new(ScheduleStatus::new(task_type.clone())),
            config,
            task_type,
            deps,
        }
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn config(&self) -> &ScheduledTaskConfig {
        &self.config
    }

    pub fn status(&self) -> ScheduleStatus {
        self.status.lock().clone()
    }

    /// Tick and record the result in the status. Errors are logged, not
    /// returned, since the next tick retries.
    pub async fn run_tick(&self) -> Option<TickOutcome> {
        let result = self.tick().await;
        let mut status = self.status.lock();
        status.last_tick = Some(Utc::now());
        match result {
            Ok(outcome) => {
                match &outcome {
                    TickOutcome::Submitted(_) => status.submitted += 1,
                    TickOutcome::Skipped(_) => status.skipped += 1,
                }
                status.last_outcome = Some(outcome.clone());
                Some(outcome)
            }
            Err(e) => {
                status.failures += 1;
                warn!(task_type = %self.task_type, "Scheduler tick failed: {}", e);
                None
            }
        }
    }

    pub async fn tick(&self) -> SchedulerResult<TickOutcome> {
        let lock_key = self.deps.keys.schedule_lock(self.task_type.as_str());
        let guard = match self.deps.locks.acquire(&lock_key, Duration::ZERO).await {
            Ok(guard) => guard,
            Err(StoreError::LockTimeout { .. }) => {
                debug!(task_type = %self.task_type, "Schedule lock held elsewhere");
                return Ok(TickOutcome::Skipped(SkipReason::LockContended));
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.tick_locked().await;
        if let Err(e) = guard.release().await {
            warn!(task_type = %self.task_type, "Failed to release schedule lock: {}", e);
        }
        result
    }

    async fn tick_locked(&self) -> SchedulerResult<TickOutcome> {
        if self.config.wait_for_previous_submitted_task_to_complete {
            if let Some(previous) = self.last_submitted().await? {
                if self.is_live(&previous).await? {
                    debug!(
                        task_type = %self.task_type,
                        previous = %previous,
                        "Previous instance still live"
                    );
                    return Ok(TickOutcome::Skipped(SkipReason::PreviousStillLive(previous)));
                }
            }
        }

        let task = self.build_task()?;
        // Recorded first: an id whose enqueue failed is simply not live.
        self.deps
            .store
            .set(&self.last_scheduled_key(), task.id.to_string().as_bytes(), None)
            .await?;
        self.deps.tasks.enqueue(&task).await?;

        info!(task_type = %self.task_type, task_id = %task.id, "Submitted scheduled task");
        Ok(TickOutcome::Submitted(task.id))
    }

    /// Id of the most recently submitted instance
    pub async fn last_submitted(&self) -> SchedulerResult<Option<TaskId>> {
        let Some(bytes) = self.deps.store.get(&self.last_scheduled_key()).await? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&bytes);
        match TaskId::parse(&id) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                warn!(task_type = %self.task_type, "Ignoring unreadable last scheduled id: {}", e);
                Ok(None)
            }
        }
    }

    /// An instance is live while its summary is non-terminal and its
    /// processor is active, or while it has no summary but is still stored
    /// (queued, or claimed and not yet summarized).
    async fn is_live(&self, id: &TaskId) -> SchedulerResult<bool> {
        match self.deps.summaries.get(id).await? {
            Some(summary) if summary.status.is_terminal() => Ok(false),
            Some(summary) => match &summary.processor_id {
                Some(processor) => Ok(self.deps.runtime.is_active(processor).await?),
                None => Ok(true),
            },
            None => Ok(self.deps.tasks.contains(id).await?),
        }
    }

    fn build_task(&self) -> SchedulerResult<Task> {
        let payload = self
            .deps
            .tasks
            .codec()
            .encode_payload(&self.config.payload)
            .map_err(|e| SchedulerError::InvalidSchedule {
                task_type: self.config.task_type.clone(),
                message: e.to_string(),
            })?;
        Ok(Task::new(self.task_type.clone(), payload).with_tenant(self.config.tenant_id.clone()))
    }

    fn last_scheduled_key(&self) -> String {
        self.deps.keys.last_scheduled(self.task_type.as_str())
    }
}
