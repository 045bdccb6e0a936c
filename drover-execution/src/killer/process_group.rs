use drover_config::KillerBackend;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing::{debug, warn};

use super::{signal_error, ProcessTreeKiller};
use crate::error::{ExecutionError, ExecutionResult};

/// Kills each worker's process group.
///
/// Workers start as group leaders, so the group id is the worker's pid and
/// survives the worker itself. Descendants that move to another group or
/// session escape it.
#[derive(Debug, Default)]
pub struct ProcessGroupKiller {
    groups: Vec<i32>,
}

impl ProcessGroupKiller {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessTreeKiller for ProcessGroupKiller {
    fn backend(&self) -> KillerBackend {
        KillerBackend::ProcessGroup
    }

    fn prepare(&self, command: &mut Command) {
        command.process_group(0);
    }

    fn add_process(&mut self, pid: Option<u32>) -> ExecutionResult<()> {
        let pid = pid
            .and_then(|pid| i32::try_from(pid).ok())
            .filter(|pid| *pid > 0)
            .ok_or_else(|| ExecutionError::InvalidArgument("process has no valid pid".to_string()))?;
        if !self.groups.contains(&pid) {
            self.groups.push(pid);
        }
        Ok(())
    }

    fn terminate_all(&mut self) -> ExecutionResult<usize> {
        let mut signalled = 0;
        let mut first_error = None;
        for group in &self.groups {
            match killpg(Pid::from_raw(*group), Signal::SIGKILL) {
                Ok(()) => {
                    debug!(pgid = group, "Killed process group");
                    signalled += 1;
                }
                Err(e) => {
                    if let Some(err) = signal_error(e) {
                        warn!(pgid = group, "Failed to kill process group: {}", err);
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(signalled),
        }
    }
}

impl Drop for ProcessGroupKiller {
    fn drop(&mut self) {
        if let Err(e) = self.terminate_all() {
            warn!("Process group teardown failed: {}", e);
        }
    }
}
