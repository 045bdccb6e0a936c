//! Recurring task submission
//!
//! Each configured task type gets a [`ScheduleRunner`] that decides, tick by
//! tick, whether to submit a new instance. [`TaskScheduler`] drives the
//! runners from `tokio-cron-scheduler` jobs.

pub mod error;
pub mod runner;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use runner::{ScheduleRunner, ScheduleStatus, SchedulerDeps, SkipReason, TickOutcome};
pub use scheduler::TaskScheduler;
