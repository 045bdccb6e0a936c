//! Graceful shutdown coordination
//!
//! A coordinator walks through shutdown phases of escalating urgency and
//! tracks how many units of work are still in flight. Subscribers observe
//! the current phase through a `watch` channel, so one that subscribes late
//! still sees the phase already reached.

use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Shutdown signal types with escalating urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownSignal {
    /// Stop taking new work, let current work finish
    Graceful,
    /// Ask current work to stop cooperatively
    Urgent,
    /// Terminate whatever is left
    Forced,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
            ShutdownSignal::Forced => write!(f, "forced"),
        }
    }
}

pub struct ShutdownCoordinator {
    signal: watch::Sender<Option<ShutdownSignal>>,
    active_tasks: Arc<watch::Sender<u32>>,
    graceful_timeout: Duration,
    urgent_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(30), Duration::from_secs(10))
    }

    pub fn with_timeouts(graceful_timeout: Duration, urgent_timeout: Duration) -> Self {
        let (signal, _) = watch::channel(None);
        let (active_tasks, _) = watch::channel(0);
        Self {
            signal,
            active_tasks: Arc::new(active_tasks),
            graceful_timeout,
            urgent_timeout,
        }
    }

    /// Subscribe to the current shutdown phase
    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownSignal>> {
        self.signal.subscribe()
    }

    pub fn current_signal(&self) -> Option<ShutdownSignal> {
        *self.signal.borrow()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.current_signal().is_some()
    }

    /// Register a unit of in-flight work; it counts until the guard drops
    pub fn task_started(&self) -> TaskGuard {
        self.active_tasks.send_modify(|count| *count += 1);
        TaskGuard {
            active_tasks: self.active_tasks.clone(),
        }
    }

    pub fn active_task_count(&self) -> u32 {
        *self.active_tasks.borrow()
    }

    /// Run the shutdown phases until in-flight work reaches zero.
    ///
    /// Returns the phase at which work drained.
    pub async fn shutdown(&self) -> Result<ShutdownSignal, ShutdownError> {
        if self.is_shutting_down() {
            return Err(ShutdownError::AlreadyShuttingDown);
        }

        info!("Starting graceful shutdown");
        self.signal.send_replace(Some(ShutdownSignal::Graceful));
        if self.wait_for_tasks(self.graceful_timeout).await {
            info!("Graceful shutdown completed successfully");
            return Ok(ShutdownSignal::Graceful);
        }

        warn!(
            "Graceful shutdown timeout with {} tasks active, escalating to urgent shutdown",
            self.active_task_count()
        );
        self.signal.send_replace(Some(ShutdownSignal::Urgent));
        if self.wait_for_tasks(self.urgent_timeout).await {
            info!("Urgent shutdown completed");
            return Ok(ShutdownSignal::Urgent);
        }

        error!("Urgent shutdown timeout, forcing shutdown");
        self.signal.send_replace(Some(ShutdownSignal::Forced));
        if self.wait_for_tasks(self.urgent_timeout).await {
            return Ok(ShutdownSignal::Forced);
        }

        Err(ShutdownError::TasksRemaining(self.active_task_count()))
    }

    /// Wait until no tasks are active or the timeout elapses
    pub async fn wait_for_tasks(&self, limit: Duration) -> bool {
        let mut active = self.active_tasks.subscribe();
        timeout(limit, active.wait_for(|count| *count == 0))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Wait, without a limit, until no tasks are active
    pub async fn wait_for_idle(&self) {
        let mut active = self.active_tasks.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = active.wait_for(|count| *count == 0).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one unit of work as in flight
pub struct TaskGuard {
    active_tasks: Arc<watch::Sender<u32>>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.active_tasks
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Shutdown error types
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,

    #[error("Forced shutdown completed with {0} tasks still active")]
    TasksRemaining(u32),

    #[error("Failed to terminate process: {0}")]
    Process(String),
}

/// Terminates external processes with escalating signals
pub struct ProcessShutdownManager;

impl ProcessShutdownManager {
    /// Ask the process to exit (SIGTERM on Unix), then kill it after `grace`
    pub async fn terminate(
        child: &mut tokio::process::Child,
        grace: Duration,
    ) -> Result<std::process::ExitStatus, ShutdownError> {
        if let Ok(Some(status)) = child.try_wait() {
            return Ok(status);
        }

        if let Some(id) = child.id() {
            info!("Initiating graceful shutdown for process {}", id);

            #[cfg(unix)]
            {
                use nix::sys::signal::{self, Signal};
                use nix::unistd::Pid;

                if let Err(e) = signal::kill(Pid::from_raw(id as i32), Signal::SIGTERM) {
                    warn!("Failed to send SIGTERM to process {}: {}", id, e);
                }
            }
        }

        if !grace.is_zero() {
            match timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("Process terminated gracefully with status: {:?}", status);
                    return Ok(status);
                }
                Ok(Err(e)) => error!("Error waiting for process: {}", e),
                Err(_) => warn!("Process did not terminate gracefully within {:?}", grace),
            }
        }

        if let Err(e) = child.start_kill() {
            if let Ok(Some(status)) = child.try_wait() {
                return Ok(status);
            }
            return Err(ShutdownError::Process(e.to_string()));
        }

        match timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => {
                info!("Process terminated forcefully with status: {:?}", status);
                Ok(status)
            }
            Ok(Err(e)) => Err(ShutdownError::Process(e.to_string())),
            Err(_) => Err(ShutdownError::Process(
                "process unresponsive to SIGKILL".to_string(),
            )),
        }
    }
}
