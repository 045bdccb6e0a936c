//! Core domain models and types for Drover
//!
//! This crate contains the task, summary and runtime records shared by every
//! other crate, together with the error taxonomy the engine reports through.

pub mod entity;
pub mod error;
pub mod runtime;
pub mod summary;
pub mod task;

pub use entity::Entity;
pub use error::{DroverError, ErrorKind, Result};
pub use runtime::{HostInfo, RuntimeInfo};
pub use summary::{TaskOutput, TaskStatus, TaskSummary};
pub use task::{Task, TaskId, TaskType};
