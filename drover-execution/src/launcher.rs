//! Starting workers and supervising their lifetime

use async_trait::async_trait;
use drover_core::{TaskId, TaskType};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ExecutionResult;
use crate::host::WorkerHost;

/// What a worker is asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub task_id: TaskId,
    pub task_type: TaskType,
    /// Registered worker name
    pub worker: String,
    pub has_job_settings: bool,
    /// Processor supervising the worker
    pub processor_id: String,
}

/// How a worker ended, as seen from outside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Success,
    /// Non-zero exit, signal or host error
    Failure(String),
    /// Stopped by its supervisor
    Killed,
}

impl WorkerExit {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerExit::Success)
    }
}

/// A started worker
#[async_trait]
pub trait WorkerHandle: Send {
    /// OS process id, for process workers
    fn pid(&self) -> Option<u32>;

    /// Wait for the worker to end. Cancel safe; may be called again after
    /// it returned.
    async fn wait(&mut self) -> ExecutionResult<WorkerExit>;

    /// Stop the worker and everything it started, immediately
    async fn kill(&mut self) -> ExecutionResult<()>;

    /// Ask the worker to exit, then kill it once `grace` has passed
    async fn terminate(&mut self, grace: Duration) -> ExecutionResult<WorkerExit>;
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, assignment: &WorkerAssignment) -> ExecutionResult<Box<dyn WorkerHandle>>;
}

/// Runs each worker as a tokio task inside the current process.
///
/// The worker still talks to its supervisor through the store, exactly as a
/// process worker does, but a crash takes the whole process down.
#[derive(Clone)]
pub struct LocalWorkerLauncher {
    host: Arc<WorkerHost>,
}

impl LocalWorkerLauncher {
    pub fn new(host: WorkerHost) -> Self {
        Self {
            host: Arc::new(host),
        }
    }
}

#[async_trait]
impl WorkerLauncher for LocalWorkerLauncher {
    async fn launch(&self, assignment: &WorkerAssignment) -> ExecutionResult<Box<dyn WorkerHandle>> {
        let host = self.host.clone();
        let assignment = assignment.clone();
        let join = tokio::spawn(async move { host.run(&assignment).await.map(|_| ()) });
        Ok(Box::new(LocalWorker { join, exit: None }))
    }
}

struct LocalWorker {
    join: JoinHandle<ExecutionResult<()>>,
    exit: Option<WorkerExit>,
}

#[async_trait]
impl WorkerHandle for LocalWorker {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> ExecutionResult<WorkerExit> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }
        let exit = match (&mut self.join).await {
            Ok(Ok(())) => WorkerExit::Success,
            Ok(Err(e)) => {
                warn!("Local worker failed: {}", e);
                WorkerExit::Failure(e.to_string())
            }
            Err(e) if e.is_cancelled() => WorkerExit::Killed,
            Err(e) => WorkerExit::Failure(format!("local worker panicked: {}", e)),
        };
        self.exit = Some(exit.clone());
        Ok(exit)
    }

    async fn kill(&mut self) -> ExecutionResult<()> {
        if self.exit.is_none() {
            debug!("Aborting local worker");
            self.join.abort();
        }
        Ok(())
    }

    async fn terminate(&mut self, grace: Duration) -> ExecutionResult<WorkerExit> {
        if let Ok(exit) = tokio::time::timeout(grace, self.wait()).await {
            return exit;
        }
        self.kill().await?;
        self.wait().await
    }
}
