//! Processor lifecycle, poll loops and heartbeat

use drover_config::{DroverConfig, ProcessorConfig, WorkersConfig};
use drover_core::{HostInfo, TaskId, TaskType};
use drover_ipc::{ChannelPublisher, CompletionNotice};
use drover_resilience::{Backoff, ShutdownCoordinator, ShutdownSignal};
use drover_storage::StorageError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deps::ProcessorDeps;
use crate::error::{ProcessorError, ProcessorResult};
use crate::reaper::OrphanReaper;
use crate::state::ProcessorState;
use crate::supervisor;

const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);

/// State shared by the poll loops and every task supervisor
pub(crate) struct Shared {
    pub processor_id: String,
    pub host: HostInfo,
    pub config: ProcessorConfig,
    pub workers: WorkersConfig,
    pub deps: ProcessorDeps,
    pub shutdown: ShutdownCoordinator,
    pub completions: ChannelPublisher<CompletionNotice>,
    pub slots: Arc<Semaphore>,
}

/// Pulls tasks for every mapped task type and supervises their workers.
///
/// `start` registers the processor and spawns its loops; `stop` stops
/// polling, drains in-flight tasks through the graceful, urgent and forced
/// phases, unregisters and publishes [`ProcessorState::Stopped`].
pub struct TaskProcessor {
    shared: Arc<Shared>,
    state: watch::Sender<ProcessorState>,
    lifecycle: AsyncMutex<()>,
    background: CancellationToken,
    loops: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskProcessor {
    pub fn new(config: &DroverConfig, deps: ProcessorDeps) -> Self {
        let processor_id = config
            .processor
            .processor_id
            .clone()
            .unwrap_or_else(generate_processor_id);
        let host = HostInfo::new(local_hostname(), std::process::id());
        let shared = Shared {
            completions: deps.channels.completion_publisher(),
            shutdown: ShutdownCoordinator::with_timeouts(
                config.processor.shutdown_grace_period,
                config.processor.cancel_grace_period,
            ),
            slots: Arc::new(Semaphore::new(config.processor.max_concurrent_tasks.max(1))),
            processor_id,
            host,
            config: config.processor.clone(),
            workers: config.workers.clone(),
            deps,
        };
        let (state, _) = watch::channel(ProcessorState::Created);
        Self {
            shared: Arc::new(shared),
            state,
            lifecycle: AsyncMutex::new(()),
            background: CancellationToken::new(),
            loops: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn processor_id(&self) -> &str {
        &self.shared.processor_id
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    /// Resolves once the processor has stopped
    pub async fn wait_stopped(&self) {
        let mut state = self.state.subscribe();
        // The sender lives as long as `self`.
        let _ = state.wait_for(|s| *s == ProcessorState::Stopped).await;
    }

    /// Tasks claimed and not yet finalized
    pub fn active_tasks(&self) -> u32 {
        self.shared.shutdown.active_task_count()
    }

    pub fn reaper(&self) -> OrphanReaper {
        OrphanReaper::new(self.shared.deps.clone(), self.shared.processor_id.clone())
    }

    pub async fn start(&self) -> ProcessorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.state();
        if current != ProcessorState::Created {
            return Err(ProcessorError::InvalidState {
                action: "start",
                state: current,
            });
        }

        let shared = &self.shared;
        shared
            .deps
            .runtime
            .heartbeat(&shared.processor_id, &shared.host)
            .await?;
        if shared.workers.is_empty() {
            warn!("No worker mappings configured; nothing will be polled");
        }

        let mut loops = Vec::new();
        loops.push(tokio::spawn(heartbeat_loop(
            shared.clone(),
            self.background.clone(),
        )));
        loops.push(tokio::spawn(self.reaper().run(
            shared.config.runtime_info_ttl,
            self.background.clone(),
        )));
        for task_type in shared.workers.task_types() {
            loops.push(tokio::spawn(poll_loop(shared.clone(), TaskType::new(task_type))));
        }
        self.loops.lock().extend(loops);

        self.state.send_replace(ProcessorState::Running);
        info!(
            processor_id = %shared.processor_id,
            host = %shared.host.hostname,
            max_concurrent_tasks = shared.config.max_concurrent_tasks,
            "Task processor started"
        );
        Ok(())
    }

    pub async fn stop(&self) -> ProcessorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ProcessorState::Running => {}
            ProcessorState::Created => {
                self.state.send_replace(ProcessorState::Stopped);
                return Ok(());
            }
            ProcessorState::Stopped => return Ok(()),
            state => {
                return Err(ProcessorError::InvalidState {
                    action: "stop",
                    state,
                })
            }
        }

        self.state.send_replace(ProcessorState::Stopping);
        info!(
            processor_id = %self.shared.processor_id,
            active = self.active_tasks(),
            "Stopping task processor"
        );

        match self.shared.shutdown.shutdown().await {
            Ok(phase) => info!("In-flight tasks drained during {} phase", phase),
            Err(e) => {
                warn!("Shutdown did not drain all tasks, waiting for them to finish: {}", e);
                self.shared.shutdown.wait_for_idle().await;
                info!("Remaining tasks finished");
            }
        }

        self.background.cancel();
        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("Processor loop panicked: {}", e);
                }
            }
        }

        if let Err(e) = self
            .shared
            .deps
            .runtime
            .unregister(&self.shared.processor_id)
            .await
        {
            warn!("Failed to unregister runtime info: {}", e);
        }

        self.state.send_replace(ProcessorState::Stopped);
        info!(processor_id = %self.shared.processor_id, "Task processor stopped");
        Ok(())
    }

    /// Ask whichever processor runs `task_id` to cancel it. A task that is
    /// still queued is cancelled when it is claimed.
    pub async fn cancel_task(&self, task_id: &TaskId, reason: Option<String>) -> ProcessorResult<()> {
        self.shared
            .deps
            .channels
            .request_cancel(task_id, reason)
            .await?;
        info!(task_id = %task_id, "Cancellation requested");
        Ok(())
    }
}

async fn poll_loop(shared: Arc<Shared>, task_type: TaskType) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut backoff = Backoff::exponential(shared.config.poll_interval, MAX_POLL_BACKOFF);
    info!(task_type = %task_type, "Polling queue");

    loop {
        if shutdown.borrow().is_some() {
            break;
        }

        let permit = tokio::select! {
            permit = shared.slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        // Counted as in flight before the pop so a concurrent stop waits
        // for whatever it returns.
        let in_flight = shared.shutdown.task_started();
        match shared.deps.tasks.dequeue(&task_type).await {
            Ok(Some(task)) => {
                backoff.reset();
                debug!(task_type = %task_type, task_id = %task.id, "Dequeued task");
                tokio::spawn(supervisor::run_claimed(shared.clone(), task, permit, in_flight));
            }
            Ok(None) => {
                drop((in_flight, permit));
                pause(&mut shutdown, shared.config.poll_interval).await;
            }
            Err(StorageError::Serialization(message)) => {
                warn!(task_type = %task_type, "Dead-lettered unreadable queue entry: {}", message);
            }
            Err(e) if e.is_unavailable() => {
                drop((in_flight, permit));
                let delay = backoff.next_delay();
                warn!(
                    task_type = %task_type,
                    attempts = backoff.attempts(),
                    "Store unavailable, pausing polling for {:?}: {}",
                    delay,
                    e
                );
                pause(&mut shutdown, delay).await;
            }
            Err(e) => {
                drop((in_flight, permit));
                error!(task_type = %task_type, "Dequeue failed: {}", e);
                pause(&mut shutdown, shared.config.poll_interval).await;
            }
        }
    }
    debug!(task_type = %task_type, "Poll loop stopped");
}

async fn pause(shutdown: &mut watch::Receiver<Option<ShutdownSignal>>, delay: Duration) {
    tokio::select! {
        _ = sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}

async fn heartbeat_loop(shared: Arc<Shared>, stop: CancellationToken) {
    let period = shared.config.heartbeat_interval;
    let mut ticks = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticks.tick() => {
                if let Err(e) = shared
                    .deps
                    .runtime
                    .heartbeat(&shared.processor_id, &shared.host)
                    .await
                {
                    warn!(processor_id = %shared.processor_id, "Heartbeat failed: {}", e);
                }
            }
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn generate_processor_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", local_hostname().replace(':', "-"), &suffix[..8])
}
