//! Resilience patterns for Drover
//!
//! Backoff for paused polling, retries for store writes that must land, and
//! escalating shutdown for processors and their worker processes.

pub mod backoff;
pub mod retry;
pub mod shutdown;

pub use backoff::{Backoff, BackoffCalculator, BackoffStrategy};
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use shutdown::{
    ProcessShutdownManager, ShutdownCoordinator, ShutdownError, ShutdownSignal, TaskGuard,
};
