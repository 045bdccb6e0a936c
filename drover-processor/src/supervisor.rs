//! Claiming one dequeued task and supervising its worker to a terminal state

use chrono::Utc;
use drover_config::WorkerMapping;
use drover_core::{DroverError, Task, TaskSummary};
use drover_execution::{ExecutionResult, WorkerAssignment, WorkerExit, WorkerHandle};
use drover_ipc::{CompletionNotice, ControlMessage, WorkerEvent};
use drover_resilience::{RetryExecutor, RetryPolicy, ShutdownSignal, TaskGuard};
use drover_store::LockGuard;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProcessorResult;
use crate::processor::Shared;

const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(10);

/// Why supervision of a running worker ended
enum Ending {
    /// The worker published a terminal event
    Event(WorkerEvent),
    Exited(ExecutionResult<WorkerExit>),
    TimedOut,
    CancelIgnored,
    ShutdownForced,
    LostLock,
}

/// Supervise `task` and hold its concurrency slot until it is finalized
pub(crate) async fn run_claimed(
    shared: Arc<Shared>,
    task: Task,
    permit: OwnedSemaphorePermit,
    in_flight: TaskGuard,
) {
    let task_id = task.id;
    if let Err(e) = execute(&shared, task).await {
        error!(task_id = %task_id, "Task supervision failed: {}", e);
    }
    drop(permit);
    drop(in_flight);
}

#[instrument(skip_all, fields(task_id = %task.id, task_type = %task.task_type))]
async fn execute(shared: &Shared, task: Task) -> ProcessorResult<()> {
    let deps = &shared.deps;
    let lock = match deps
        .locks
        .acquire(&deps.keys.task_lock(task.id), shared.config.claim_timeout)
        .await
    {
        Ok(lock) => lock,
        Err(e) => {
            if e.is_lock_timeout() {
                warn!("Task is locked by another processor, returning it to the queue");
            }
            deps.tasks.enqueue(&task).await?;
            return if e.is_lock_timeout() { Ok(()) } else { Err(e.into()) };
        }
    };

    if let Some(existing) = deps.summaries.get(&task.id).await? {
        if existing.status.is_terminal() {
            info!(status = %existing.status.as_str(), "Task already finished, dropping stale queue entry");
            deps.tasks.remove(&task.id).await?;
            lock.release().await?;
            return Ok(());
        }
    }

    let mut summary = TaskSummary::running(&task, &shared.processor_id, Utc::now());
    deps.summaries.save(&summary).await?;
    deps.runtime
        .record_executing(&shared.processor_id, &task.id)
        .await?;
    info!("Claimed task");

    let outcome = match supervise(shared, &task, &mut summary, &lock).await {
        Ok(outcome) => outcome,
        Err(e) => Some(worker_fault(e.to_string())),
    };

    match outcome {
        Some(outcome) => finalize(shared, &task, &mut summary, &outcome).await,
        None => {
            warn!("Lost the task lock, leaving the task to its new owner");
            if let Err(e) = deps
                .runtime
                .record_completed(&shared.processor_id, &task.id)
                .await
            {
                warn!("Failed to update runtime info: {}", e);
            }
        }
    }

    if let Err(e) = lock.release().await {
        warn!("Failed to release task lock: {}", e);
    }
    Ok(())
}

/// Run the worker for `task`. `None` means the lock was lost and the task
/// must not be finalized here.
async fn supervise(
    shared: &Shared,
    task: &Task,
    summary: &mut TaskSummary,
    lock: &LockGuard,
) -> ProcessorResult<Option<WorkerEvent>> {
    let deps = &shared.deps;
    let mapping: WorkerMapping = match shared.workers.worker_for(task.task_type.as_str()) {
        Ok(mapping) => mapping.clone(),
        Err(e) => {
            return Ok(Some(WorkerEvent::Failed {
                error: DroverError::Configuration(e.to_string()).to_string(),
                details: None,
            }))
        }
    };

    if deps.channels.is_cancel_requested(&task.id).await? {
        info!("Cancellation was requested before launch");
        return Ok(Some(WorkerEvent::Cancelled));
    }

    let mut events = deps.channels.subscribe_events(&task.id).await?;
    let mut control = deps.channels.subscribe_control(&task.id).await?;

    let assignment = WorkerAssignment {
        task_id: task.id,
        task_type: task.task_type.clone(),
        worker: mapping.worker.clone(),
        has_job_settings: mapping.has_job_settings,
        processor_id: shared.processor_id.clone(),
    };
    let mut handle = match deps.launcher.launch(&assignment).await {
        Ok(handle) => handle,
        Err(e) => return Ok(Some(worker_fault(format!("failed to launch worker: {}", e)))),
    };
    debug!(worker = %mapping.worker, pid = ?handle.pid(), "Worker launched");

    let limit = mapping
        .timeout
        .unwrap_or(shared.config.default_task_timeout);
    let deadline = Instant::now() + limit;
    let mut cancel_deadline: Option<Instant> = None;

    let renew_every = (lock.ttl() / 3).max(MIN_RENEW_INTERVAL);
    let mut renewals = interval_at(Instant::now() + renew_every, renew_every);
    renewals.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut shutdown = shared.shutdown.subscribe();
    shutdown.mark_changed();
    let mut shutdown_open = true;
    let mut events_open = true;
    let mut control_open = true;

    let ending = loop {
        tokio::select! {
            exit = handle.wait() => break Ending::Exited(exit),
            received = events.receive(), if events_open => match received {
                Ok(envelope) if envelope.message.is_terminal() => break Ending::Event(envelope.message),
                Ok(envelope) => apply_progress(shared, summary, envelope.message).await,
                Err(e) => {
                    warn!("Event channel unusable: {}", e);
                    events_open = false;
                }
            },
            message = control.receive(), if control_open => match message {
                Ok(envelope) => match envelope.message {
                    ControlMessage::Cancel { reason } => {
                        info!(reason = reason.as_deref().unwrap_or("none"), "Cancel requested");
                        if cancel_deadline.is_none() {
                            cancel_deadline = Some(Instant::now() + shared.config.cancel_grace_period);
                        }
                    }
                },
                Err(e) => {
                    warn!("Control channel unusable: {}", e);
                    control_open = false;
                }
            },
            _ = sleep_until(deadline) => break Ending::TimedOut,
            _ = sleep_until(cancel_deadline.unwrap_or(deadline)), if cancel_deadline.is_some() => {
                break Ending::CancelIgnored
            }
            _ = renewals.tick() => match lock.renew().await {
                Ok(true) => {}
                Ok(false) => break Ending::LostLock,
                Err(e) => warn!("Failed to renew task lock: {}", e),
            },
            changed = shutdown.changed(), if shutdown_open => {
                if changed.is_err() {
                    shutdown_open = false;
                    continue;
                }
                let phase = *shutdown.borrow_and_update();
                match phase {
                    Some(ShutdownSignal::Urgent) => {
                        if cancel_deadline.is_none() {
                            info!("Urgent shutdown, cancelling task");
                            if let Err(e) = deps
                                .channels
                                .request_cancel(&task.id, Some("processor shutting down".to_string()))
                                .await
                            {
                                warn!("Failed to request cancellation: {}", e);
                            }
                            cancel_deadline = Some(Instant::now() + shared.config.cancel_grace_period);
                        }
                    }
                    Some(ShutdownSignal::Forced) => break Ending::ShutdownForced,
                    _ => {}
                }
            }
        }
    };

    let outcome = match ending {
        Ending::Event(event) => {
            settle(shared, handle.as_mut()).await;
            event
        }
        Ending::Exited(exit) => {
            let mut reported = None;
            while let Ok(Some(envelope)) = events.try_receive() {
                if envelope.message.is_terminal() {
                    reported = Some(envelope.message);
                    break;
                }
                apply_progress(shared, summary, envelope.message).await;
            }
            match reported {
                Some(event) => event,
                None => match deps.channels.read_outcome(&task.id).await {
                    Ok(Some(event)) if event.is_terminal() => event,
                    _ => worker_fault(format!(
                        "worker exited without reporting an outcome ({})",
                        describe_exit(&exit)
                    )),
                },
            }
        }
        Ending::TimedOut => {
            warn!(timeout = ?limit, "Task timed out, terminating worker");
            terminate(shared, handle.as_mut()).await;
            worker_fault(format!("timed out after {:?}", limit))
        }
        Ending::CancelIgnored => {
            warn!("Worker did not stop after cancellation, terminating it");
            terminate(shared, handle.as_mut()).await;
            WorkerEvent::Cancelled
        }
        Ending::ShutdownForced => {
            warn!("Forced shutdown, killing worker");
            kill(handle.as_mut()).await;
            WorkerEvent::Cancelled
        }
        Ending::LostLock => {
            kill(handle.as_mut()).await;
            return Ok(None);
        }
    };
    Ok(Some(outcome))
}

async fn apply_progress(shared: &Shared, summary: &mut TaskSummary, event: WorkerEvent) {
    match event {
        WorkerEvent::Started { pid } => debug!(pid, "Worker reported start"),
        WorkerEvent::Progress { percent, message } => {
            if summary.record_progress(percent, message, Utc::now()) {
                if let Err(e) = shared.deps.summaries.save(summary).await {
                    warn!("Failed to save progress: {}", e);
                }
            }
        }
        _ => {}
    }
}

/// Give a worker that already reported its outcome time to exit
async fn settle(shared: &Shared, handle: &mut dyn WorkerHandle) {
    if timeout(shared.config.cancel_grace_period, handle.wait())
        .await
        .is_err()
    {
        warn!("Worker lingered after reporting its outcome, killing it");
        kill(handle).await;
    }
}

/// Ask the worker to exit, killing it once the cancel grace period is up
async fn terminate(shared: &Shared, handle: &mut dyn WorkerHandle) {
    match handle.terminate(shared.config.cancel_grace_period).await {
        Ok(exit) => debug!(?exit, "Worker terminated"),
        Err(e) => warn!("Failed to terminate worker: {}", e),
    }
}

async fn kill(handle: &mut dyn WorkerHandle) {
    if let Err(e) = handle.kill().await {
        warn!("Failed to kill worker: {}", e);
    }
}

async fn finalize(shared: &Shared, task: &Task, summary: &mut TaskSummary, outcome: &WorkerEvent) {
    let deps = &shared.deps;
    let now = Utc::now();
    match outcome {
        WorkerEvent::Completed { output } => summary.complete(output.clone(), now),
        WorkerEvent::Failed { error, details } => summary.fail(error.clone(), details.clone(), now),
        WorkerEvent::Cancelled => summary.cancel(now),
        other => summary.fail(
            DroverError::WorkerFault(format!("unexpected final event {:?}", other)).to_string(),
            None,
            now,
        ),
    }

    let summaries = &deps.summaries;
    let snapshot: &TaskSummary = summary;
    if let Err(e) = RetryExecutor::new(RetryPolicy::persistent())
        .execute(|| summaries.save(snapshot))
        .await
    {
        error!("Failed to record final summary: {}", e);
    }

    if let Err(e) = deps.tasks.remove(&task.id).await {
        warn!("Failed to remove finished task: {}", e);
    }
    if let Err(e) = deps.channels.clear(&task.id).await {
        warn!("Failed to clear task records: {}", e);
    }
    if let Err(e) = deps
        .runtime
        .record_completed(&shared.processor_id, &task.id)
        .await
    {
        warn!("Failed to update runtime info: {}", e);
    }

    let notice = CompletionNotice {
        task_id: task.id,
        task_type: task.task_type.clone(),
        status: summary.status,
        processor_id: shared.processor_id.clone(),
    };
    if let Err(e) = shared.completions.publish(notice).await {
        warn!("Failed to publish completion: {}", e);
    }
    info!(status = %summary.status.as_str(), "Task finished");
}

fn worker_fault(message: impl Into<String>) -> WorkerEvent {
    WorkerEvent::Failed {
        error: DroverError::WorkerFault(message.into()).to_string(),
        details: None,
    }
}

fn describe_exit(exit: &ExecutionResult<WorkerExit>) -> String {
    match exit {
        Ok(WorkerExit::Success) => "exited cleanly".to_string(),
        Ok(WorkerExit::Failure(reason)) => reason.clone(),
        Ok(WorkerExit::Killed) => "killed".to_string(),
        Err(e) => e.to_string(),
    }
}
