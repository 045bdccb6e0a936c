//! Logging setup for Drover
//!
//! Processes log through `tracing`. Worker processes write to stderr only;
//! their stdout is owned by the parent.

pub mod init;

pub use init::{build_env_filter, init_logging, init_simple_tracing, init_worker_tracing};
