//! Task processor orchestrator
//!
//! A [`TaskProcessor`] polls the queue of every task type it has a worker
//! for, claims each dequeued task under its distributed lock, launches a
//! worker for it and supervises the worker until a terminal summary is
//! written. It also heartbeats its runtime info and reaps tasks left
//! running by processors that stopped heartbeating.

pub mod deps;
pub mod error;
pub mod processor;
pub mod reaper;
pub mod state;
mod supervisor;

pub use deps::ProcessorDeps;
pub use error::{ProcessorError, ProcessorResult};
pub use processor::TaskProcessor;
pub use reaper::OrphanReaper;
pub use state::ProcessorState;
