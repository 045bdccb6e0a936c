//! Drives one worker through one task

use drover_core::{Task, TaskOutput};
use drover_ipc::WorkerEvent;
use drover_storage::EntityCodec;
use std::any::Any;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::progress::ProgressReporter;
use crate::worker::{TaskWorker, WorkerContext, WorkerTaskError};

/// Runs a [`TaskWorker`] and turns whatever it does into a terminal event.
///
/// Once [`cancel_task`](Self::cancel_task) has been called the outcome is
/// always `Cancelled`, whatever the worker returns afterwards.
pub struct WorkerRuntime {
    worker: Arc<dyn TaskWorker>,
    cancellation: CancellationToken,
}

impl WorkerRuntime {
    pub fn new(worker: Arc<dyn TaskWorker>) -> Self {
        Self {
            worker,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel_task(&self) {
        if !self.cancellation.is_cancelled() {
            debug!(worker = %self.worker.name(), "Cancellation requested");
        }
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Run the worker to completion. Panics are caught and reported as
    /// failures.
    pub async fn start_task(
        &self,
        task: Task,
        job_settings: Option<Vec<u8>>,
        codec: EntityCodec,
        progress: ProgressReporter,
    ) -> WorkerEvent {
        let ctx = WorkerContext::new(
            task,
            job_settings,
            codec,
            self.cancellation.clone(),
            progress,
        );
        let worker = self.worker.clone();
        let running = AbortOnDrop(tokio::spawn(async move {
            let ctx = ctx;
            worker.start_task(&ctx).await
        }));
        let result = running.join().await;
        self.outcome(result)
    }

    fn outcome(&self, result: Result<Result<TaskOutput, WorkerTaskError>, JoinError>) -> WorkerEvent {
        if self.is_cancelled() {
            if let Ok(Err(error)) = &result {
                if *error != WorkerTaskError::Cancelled {
                    debug!("Worker ended with '{}' after cancellation", error);
                }
            }
            return WorkerEvent::Cancelled;
        }

        match result {
            Ok(Ok(output)) => WorkerEvent::Completed { output },
            Ok(Err(WorkerTaskError::Cancelled)) => {
                warn!(worker = %self.worker.name(), "Worker cancelled itself without a request");
                WorkerEvent::Cancelled
            }
            Ok(Err(WorkerTaskError::Serialization(message))) => WorkerEvent::Failed {
                error: format!("Serialization error: {}", message),
                details: None,
            },
            Ok(Err(WorkerTaskError::Failed { message, details })) => WorkerEvent::Failed {
                error: message,
                details,
            },
            Err(join_error) if join_error.is_panic() => {
                let details = panic_message(join_error.into_panic());
                error!(worker = %self.worker.name(), "Worker panicked: {}", details);
                WorkerEvent::Failed {
                    error: "Worker panicked".to_string(),
                    details: Some(details),
                }
            }
            Err(join_error) => WorkerEvent::Failed {
                error: format!("Worker task aborted: {}", join_error),
                details: None,
            },
        }
    }
}

/// Aborts the spawned worker if the runtime future is dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(mut self) -> Result<T, JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
