//! Tearing down a worker together with every process it started
//!
//! Two strategies are available. [`ProcessGroupKiller`] starts each worker
//! as the leader of a new process group and signals the whole group.
//! [`SupervisorKiller`] (Linux) starts each worker in a new session, makes
//! this process a child subreaper so orphaned descendants stay visible, and
//! has the kernel kill the worker should this process die first.

use drover_config::KillerBackend;
use std::process::Command;

use crate::error::ExecutionResult;

#[cfg(unix)]
mod process_group;
#[cfg(target_os = "linux")]
mod supervisor;

#[cfg(unix)]
pub use process_group::ProcessGroupKiller;
#[cfg(target_os = "linux")]
pub use supervisor::SupervisorKiller;

/// Tracks worker processes and kills their whole trees.
///
/// Dropping a killer terminates everything it still tracks.
pub trait ProcessTreeKiller: Send + Sync {
    fn backend(&self) -> KillerBackend;

    /// Adjust a command before it is spawned so its tree can be found later
    fn prepare(&self, command: &mut Command);

    /// Track a spawned worker. `None` (no pid) is an invalid argument.
    fn add_process(&mut self, pid: Option<u32>) -> ExecutionResult<()>;

    /// Kill every tracked tree. Returns how many processes were signalled.
    fn terminate_all(&mut self) -> ExecutionResult<usize>;
}

/// Killer for `backend`. Falls back to process groups where the supervisor
/// strategy is unavailable.
#[cfg(unix)]
pub fn create_killer(backend: KillerBackend) -> Box<dyn ProcessTreeKiller> {
    match backend {
        #[cfg(target_os = "linux")]
        KillerBackend::Supervisor => Box::new(SupervisorKiller::new()),
        #[cfg(not(target_os = "linux"))]
        KillerBackend::Supervisor => {
            tracing::warn!("Supervisor killer needs Linux; using process groups");
            Box::new(ProcessGroupKiller::new())
        }
        KillerBackend::ProcessGroup => Box::new(ProcessGroupKiller::new()),
    }
}

#[cfg(not(unix))]
pub fn create_killer(backend: KillerBackend) -> Box<dyn ProcessTreeKiller> {
    tracing::warn!(?backend, "Process tree killing is unsupported on this platform");
    Box::new(DirectChildrenOnly::default())
}

/// Placeholder that tracks pids but relies on `kill_on_drop` for teardown
#[cfg(not(unix))]
#[derive(Default)]
struct DirectChildrenOnly {
    pids: Vec<u32>,
}

#[cfg(not(unix))]
impl ProcessTreeKiller for DirectChildrenOnly {
    fn backend(&self) -> KillerBackend {
        KillerBackend::ProcessGroup
    }

    fn prepare(&self, _command: &mut Command) {}

    fn add_process(&mut self, pid: Option<u32>) -> ExecutionResult<()> {
        let pid = pid.ok_or_else(|| {
            crate::error::ExecutionError::InvalidArgument("process has no pid".to_string())
        })?;
        self.pids.push(pid);
        Ok(())
    }

    fn terminate_all(&mut self) -> ExecutionResult<usize> {
        Ok(0)
    }
}

#[cfg(unix)]
pub(crate) fn signal_error(err: nix::errno::Errno) -> Option<crate::error::ExecutionError> {
    match err {
        // Already gone.
        nix::errno::Errno::ESRCH => None,
        other => Some(crate::error::ExecutionError::Process(other.to_string())),
    }
}
