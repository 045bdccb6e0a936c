use drover_config::KillerBackend;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

use super::{signal_error, ProcessTreeKiller};
use crate::error::{ExecutionError, ExecutionResult};

const REAP_ATTEMPTS: usize = 20;
const REAP_INTERVAL: Duration = Duration::from_millis(5);

/// Finds and kills every descendant of each tracked worker.
///
/// Workers start in their own session and receive SIGKILL when this process
/// dies. This process becomes a child subreaper, so descendants orphaned by
/// a dead worker are re-parented here instead of to init and can still be
/// found and reaped, zombies included. Members of a tree are stopped before
/// any is killed so none can fork in between.
#[derive(Debug)]
pub struct SupervisorKiller {
    roots: Vec<i32>,
    /// Non-root members from earlier sweeps not yet seen to be gone
    seen: BTreeSet<i32>,
}

impl SupervisorKiller {
    pub fn new() -> Self {
        if let Err(e) = nix::sys::prctl::set_child_subreaper(true) {
            warn!("Could not become a child subreaper: {}", e);
        }
        Self {
            roots: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    /// Reap orphans until every member seen so far has left the process
    /// table, giving up after a bounded number of attempts.
    fn reap_orphans(&mut self, own_pid: i32) {
        for attempt in 0..REAP_ATTEMPTS {
            let processes = list_processes();
            for pid in orphans_to_reap(&self.roots, &self.seen, own_pid, &processes) {
                if let Err(e) = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
                    debug!(pid, "Could not reap orphan: {}", e);
                }
            }

            let listed: BTreeSet<i32> = processes.iter().map(|p| p.pid).collect();
            self.seen.retain(|pid| listed.contains(pid));
            if self.seen.is_empty() {
                return;
            }
            if attempt + 1 < REAP_ATTEMPTS {
                std::thread::sleep(REAP_INTERVAL);
            }
        }
        debug!(pending = ?self.seen, "Orphaned processes not yet reaped");
    }
}

impl Default for SupervisorKiller {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTreeKiller for SupervisorKiller {
    fn backend(&self) -> KillerBackend {
        KillerBackend::Supervisor
    }

    fn prepare(&self, command: &mut Command) {
        // SAFETY: the hook only issues the async-signal-safe setsid and
        // prctl system calls between fork and exec.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                nix::sys::prctl::set_pdeathsig(Signal::SIGKILL).map_err(std::io::Error::from)?;
                Ok(())
            });
        }
    }

    fn add_process(&mut self, pid: Option<u32>) -> ExecutionResult<()> {
        let pid = pid
            .and_then(|pid| i32::try_from(pid).ok())
            .filter(|pid| *pid > 0)
            .ok_or_else(|| ExecutionError::InvalidArgument("process has no valid pid".to_string()))?;
        if !self.roots.contains(&pid) {
            self.roots.push(pid);
        }
        Ok(())
    }

    fn terminate_all(&mut self) -> ExecutionResult<usize> {
        if self.roots.is_empty() {
            return Ok(0);
        }
        let processes = list_processes();
        let members = tree_members(&self.roots, &processes);
        let own_pid = std::process::id() as i32;

        for pid in &members {
            if let Err(e) = kill(Pid::from_raw(*pid), Signal::SIGSTOP) {
                if let Some(err) = signal_error(e) {
                    debug!(pid, "Could not stop process: {}", err);
                }
            }
        }

        let mut signalled = 0;
        let mut first_error = None;
        for pid in &members {
            match kill(Pid::from_raw(*pid), Signal::SIGKILL) {
                Ok(()) => signalled += 1,
                Err(e) => {
                    if let Some(err) = signal_error(e) {
                        warn!(pid, "Failed to kill process: {}", err);
                        first_error.get_or_insert(err);
                    }
                }
            }
        }

        let roots = &self.roots;
        self.seen
            .extend(members.iter().copied().filter(|pid| !roots.contains(pid)));
        self.reap_orphans(own_pid);

        debug!(roots = ?self.roots, signalled, "Terminated supervised process trees");
        match first_error {
            Some(err) => Err(err),
            None => Ok(signalled),
        }
    }
}

impl Drop for SupervisorKiller {
    fn drop(&mut self) {
        if let Err(e) = self.terminate_all() {
            warn!("Supervised process teardown failed: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcStat {
    pid: i32,
    state: char,
    ppid: i32,
    session: i32,
}

/// Parse `/proc/<pid>/stat`. The command name may itself contain spaces and
/// parentheses, so fields are read after the last `)`.
fn parse_stat(content: &str) -> Option<ProcStat> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let pid = content[..open].trim().parse().ok()?;
    let mut fields = content[close + 1..].split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    let _pgrp = fields.next()?;
    let session = fields.next()?.parse().ok()?;
    Some(ProcStat {
        pid,
        state,
        ppid,
        session,
    })
}

fn list_processes() -> Vec<ProcStat> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
        .filter_map(|content| parse_stat(&content))
        .collect()
}

/// Live roots, everything in their sessions, and every descendant of those
fn tree_members(roots: &[i32], processes: &[ProcStat]) -> BTreeSet<i32> {
    let live: Vec<&ProcStat> = processes.iter().filter(|p| p.state != 'Z').collect();
    let mut members: BTreeSet<i32> = live
        .iter()
        .filter(|p| roots.contains(&p.pid) || roots.contains(&p.session))
        .map(|p| p.pid)
        .collect();

    loop {
        let before = members.len();
        for process in &live {
            if members.contains(&process.ppid) {
                members.insert(process.pid);
            }
        }
        if members.len() == before {
            break;
        }
    }

    members.remove(&(std::process::id() as i32));
    members
}

/// Children of this process that came out of a supervised tree, live or
/// zombie: members seen in a sweep, or anything still in a worker's session.
/// Roots are reaped by whoever spawned them.
fn orphans_to_reap(
    roots: &[i32],
    seen: &BTreeSet<i32>,
    own_pid: i32,
    processes: &[ProcStat],
) -> Vec<i32> {
    processes
        .iter()
        .filter(|p| p.ppid == own_pid && !roots.contains(&p.pid))
        .filter(|p| seen.contains(&p.pid) || roots.contains(&p.session))
        .map(|p| p.pid)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_with_awkward_command_name() {
        let stat = "4242 (my (odd) cmd) S 100 4242 4242 0 -1 4194560 0 0";
        let parsed = parse_stat(stat).unwrap();
        assert_eq!(
            parsed,
            ProcStat {
                pid: 4242,
                state: 'S',
                ppid: 100,
                session: 4242,
            }
        );
        assert!(parse_stat("garbage").is_none());
    }

    #[test]
    fn test_tree_members_follow_sessions_and_parents() {
        let p = |pid, state, ppid, session| ProcStat {
            pid,
            state,
            ppid,
            session,
        };
        let processes = vec![
            p(10, 'S', 1, 10),
            p(11, 'S', 10, 10),
            // orphan that kept the worker's session
            p(12, 'S', 1, 10),
            // left the session but is still a descendant
            p(13, 'S', 11, 13),
            p(14, 'S', 13, 13),
            p(15, 'Z', 10, 10),
            p(20, 'S', 1, 20),
        ];
        let members = tree_members(&[10], &processes);
        assert_eq!(members, BTreeSet::from([10, 11, 12, 13, 14]));
    }

    #[test]
    fn test_orphans_include_zombies_from_supervised_trees() {
        let p = |pid, state, ppid, session| ProcStat {
            pid,
            state,
            ppid,
            session,
        };
        let own = 1000;
        let processes = vec![
            // the worker itself
            p(10, 'Z', own, 10),
            // exited orphan still in the worker's session
            p(11, 'Z', own, 10),
            // exited orphan that had left the session, seen in a sweep
            p(12, 'Z', own, 12),
            // never seen and in another session: someone else's child
            p(13, 'Z', own, 13),
            // in the session but not re-parented to us
            p(14, 'S', 1, 10),
            p(15, 'S', own, 10),
        ];
        let seen = BTreeSet::from([12]);
        assert_eq!(orphans_to_reap(&[10], &seen, own, &processes), vec![11, 12, 15]);
    }
}
