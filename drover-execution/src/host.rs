//! Runs one assigned task inside a worker process or local task

use drover_core::TaskId;
use drover_ipc::{ChannelPublisher, ControlMessage, TaskChannels, WorkerEvent};
use drover_resilience::{RetryExecutor, RetryPolicy};
use drover_storage::{JobSettingsStore, TaskRepository};
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::launcher::WorkerAssignment;
use crate::progress::ProgressReporter;
use crate::runtime::WorkerRuntime;
use crate::worker::WorkerRegistry;

/// Connects a registered worker to its task's store channels.
///
/// The host subscribes to the control channel before it reads the cancel
/// flag, forwards progress in order, and writes the outcome record before
/// it publishes the terminal event.
#[derive(Clone)]
pub struct WorkerHost {
    tasks: TaskRepository,
    settings: JobSettingsStore,
    channels: TaskChannels,
    registry: WorkerRegistry,
}

impl WorkerHost {
    pub fn new(
        tasks: TaskRepository,
        settings: JobSettingsStore,
        channels: TaskChannels,
        registry: WorkerRegistry,
    ) -> Self {
        Self {
            tasks,
            settings,
            channels,
            registry,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub async fn run(&self, assignment: &WorkerAssignment) -> ExecutionResult<WorkerEvent> {
        let task_id = &assignment.task_id;
        let worker = self
            .registry
            .get(&assignment.worker)
            .ok_or_else(|| ExecutionError::UnknownWorker(assignment.worker.clone()))?;

        let mut control = self.channels.subscribe_control(task_id).await?;
        let events = self.channels.event_publisher(task_id);

        let task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or(ExecutionError::TaskNotFound(*task_id))?;
        let job_settings = if assignment.has_job_settings {
            self.settings
                .get(task_id)
                .await?
                .or_else(|| task.job_settings.clone())
        } else {
            None
        };

        let runtime = WorkerRuntime::new(worker);
        if self.channels.is_cancel_requested(task_id).await? {
            info!(task_id = %task_id, "Cancellation was requested before the worker started");
            runtime.cancel_task();
        }

        self.publish(
            &events,
            WorkerEvent::Started {
                pid: std::process::id(),
            },
        )
        .await;
        info!(task_id = %task_id, worker = %assignment.worker, "Worker started");

        let (progress, mut updates) = ProgressReporter::channel();
        let run = runtime.start_task(task, job_settings, self.tasks.codec().clone(), progress);
        tokio::pin!(run);

        let mut progress_open = true;
        let mut control_open = true;
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                update = updates.recv(), if progress_open => match update {
                    Some(update) => {
                        self.publish(
                            &events,
                            WorkerEvent::Progress {
                                percent: update.percent,
                                message: update.message,
                            },
                        )
                        .await;
                    }
                    None => progress_open = false,
                },
                message = control.receive(), if control_open => match message {
                    Ok(envelope) => match envelope.message {
                        ControlMessage::Cancel { reason } => {
                            info!(
                                task_id = %task_id,
                                reason = reason.as_deref().unwrap_or("none"),
                                "Cancel received"
                            );
                            runtime.cancel_task();
                        }
                    },
                    Err(e) => {
                        warn!(task_id = %task_id, "Control channel unusable: {}", e);
                        control_open = false;
                    }
                },
            }
        };

        while let Ok(update) = updates.try_recv() {
            self.publish(
                &events,
                WorkerEvent::Progress {
                    percent: update.percent,
                    message: update.message,
                },
            )
            .await;
        }

        self.record_outcome(task_id, &outcome).await?;
        self.publish(&events, outcome.clone()).await;
        info!(task_id = %task_id, outcome = ?outcome.terminal_status(), "Worker finished");
        Ok(outcome)
    }

    async fn record_outcome(&self, task_id: &TaskId, outcome: &WorkerEvent) -> ExecutionResult<()> {
        let channels = &self.channels;
        RetryExecutor::new(RetryPolicy::persistent())
            .execute(move || channels.write_outcome(task_id, outcome))
            .await
            .map_err(|e| ExecutionError::Ipc(e.into_inner()))
    }

    async fn publish(&self, events: &ChannelPublisher<WorkerEvent>, event: WorkerEvent) {
        match events.publish(event).await {
            Ok(0) => debug!(channel = %events.channel(), "No subscriber for worker event"),
            Ok(_) => {}
            Err(e) => warn!(channel = %events.channel(), "Failed to publish worker event: {}", e),
        }
    }
}
