//! Drover worker execution
//!
//! This crate runs task workers: the [`TaskWorker`] trait user code
//! implements, the runtime that drives one worker with progress and
//! cooperative cancellation, the host that connects a worker to its task's
//! channels, and the launchers that put a worker in a child process or a
//! local tokio task. Process trees are torn down by a [`ProcessTreeKiller`].

pub mod error;
pub mod host;
pub mod killer;
pub mod launcher;
pub mod process;
pub mod progress;
pub mod runtime;
pub mod worker;

pub use error::{ExecutionError, ExecutionResult};
pub use host::WorkerHost;
pub use killer::{create_killer, ProcessTreeKiller};
pub use launcher::{LocalWorkerLauncher, WorkerAssignment, WorkerExit, WorkerHandle, WorkerLauncher};
pub use process::{ProcessWorkerLauncher, WorkerProcess};
pub use progress::{ProgressReporter, ProgressTracker, ProgressUpdate};
pub use runtime::WorkerRuntime;
pub use worker::{TaskWorker, WorkerContext, WorkerRegistry, WorkerTaskError};
