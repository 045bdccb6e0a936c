//! Workers in child processes

use async_trait::async_trait;
use drover_config::{KillerBackend, ProcessorConfig};
use drover_resilience::ProcessShutdownManager;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::killer::{create_killer, ProcessTreeKiller};
use crate::launcher::{WorkerAssignment, WorkerExit, WorkerHandle, WorkerLauncher};

/// Starts each worker as `<executable> worker ...`.
///
/// The child reads its task from the store and reports back over the
/// store's channels; stdin and stdout are unused and stderr is inherited so
/// worker logs reach the processor's log stream.
#[derive(Debug, Clone)]
pub struct ProcessWorkerLauncher {
    executable: PathBuf,
    killer: KillerBackend,
    config_path: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ProcessWorkerLauncher {
    pub fn new(executable: impl Into<PathBuf>, killer: KillerBackend) -> Self {
        Self {
            executable: executable.into(),
            killer,
            config_path: None,
            env: Vec::new(),
        }
    }

    /// Launcher for the configured worker binary, or the current executable
    pub fn from_config(config: &ProcessorConfig) -> ExecutionResult<Self> {
        let executable = match &config.worker_executable {
            Some(path) => path.clone(),
            None => std::env::current_exe()
                .map_err(|e| ExecutionError::Spawn(format!("cannot locate current executable: {}", e)))?,
        };
        Ok(Self::new(executable, config.killer))
    }

    /// Configuration file handed to every worker
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn executable(&self) -> &PathBuf {
        &self.executable
    }

    fn command(&self, assignment: &WorkerAssignment) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.executable);
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        cmd.arg("worker")
            .arg("--task-id")
            .arg(assignment.task_id.to_string())
            .arg("--task-type")
            .arg(assignment.task_type.as_str())
            .arg("--worker")
            .arg(&assignment.worker)
            .arg("--processor-id")
            .arg(&assignment.processor_id);
        if assignment.has_job_settings {
            cmd.arg("--with-job-settings");
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        cmd
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn launch(&self, assignment: &WorkerAssignment) -> ExecutionResult<Box<dyn WorkerHandle>> {
        let mut std_cmd = self.command(assignment);
        let mut killer = create_killer(self.killer);
        killer.prepare(&mut std_cmd);

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| {
            ExecutionError::Spawn(format!("{}: {}", self.executable.display(), e))
        })?;
        killer.add_process(child.id())?;

        info!(
            task_id = %assignment.task_id,
            pid = ?child.id(),
            killer = ?killer.backend(),
            "Spawned worker process"
        );
        Ok(Box::new(WorkerProcess::new(child, killer)))
    }
}

/// A running worker process and the killer tracking its tree.
///
/// Tree sweeps block (they scan processes and wait for reaping), so they run
/// on the blocking pool, including the one a dropped killer performs.
pub struct WorkerProcess {
    child: Child,
    killer: Option<Box<dyn ProcessTreeKiller>>,
    pid: Option<u32>,
    exit: Option<WorkerExit>,
}

impl WorkerProcess {
    pub fn new(child: Child, killer: Box<dyn ProcessTreeKiller>) -> Self {
        let pid = child.id();
        Self {
            child,
            killer: Some(killer),
            pid,
            exit: None,
        }
    }

    async fn terminate_tree(&mut self) -> ExecutionResult<usize> {
        let Some(mut killer) = self.killer.take() else {
            return Ok(0);
        };
        let (killer, result) = tokio::task::spawn_blocking(move || {
            let result = killer.terminate_all();
            (killer, result)
        })
        .await
        .map_err(|e| ExecutionError::Process(format!("process tree cleanup failed: {}", e)))?;
        self.killer = Some(killer);
        result
    }

    /// Kill whatever the worker left behind once it is gone
    async fn finish(&mut self, status: ExitStatus) -> WorkerExit {
        if let Err(e) = self.terminate_tree().await {
            warn!(pid = ?self.pid, "Failed to clean up worker process tree: {}", e);
        }
        let exit = exit_from_status(status);
        debug!(pid = ?self.pid, ?exit, "Worker process exited");
        self.exit = Some(exit.clone());
        exit
    }
}

#[async_trait]
impl WorkerHandle for WorkerProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> ExecutionResult<WorkerExit> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ExecutionError::Process(e.to_string()))?;
        Ok(self.finish(status).await)
    }

    async fn kill(&mut self) -> ExecutionResult<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        self.terminate_tree().await?;
        if let Err(e) = self.child.start_kill() {
            debug!(pid = ?self.pid, "Worker already exited: {}", e);
        }
        Ok(())
    }

    async fn terminate(&mut self, grace: Duration) -> ExecutionResult<WorkerExit> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }
        let status = ProcessShutdownManager::terminate(&mut self.child, grace)
            .await
            .map_err(|e| ExecutionError::Process(e.to_string()))?;
        Ok(self.finish(status).await)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let Some(killer) = self.killer.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || drop(killer));
            }
            Err(_) => drop(killer),
        }
    }
}

fn exit_from_status(status: ExitStatus) -> WorkerExit {
    if status.success() {
        return WorkerExit::Success;
    }
    if let Some(code) = status.code() {
        return WorkerExit::Failure(format!("exited with code {}", code));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return WorkerExit::Failure(format!("terminated by signal {}", signal));
        }
    }
    WorkerExit::Failure(format!("exited with {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::{TaskId, TaskType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn assignment() -> WorkerAssignment {
        WorkerAssignment {
            task_id: TaskId::new(),
            task_type: TaskType::new("report"),
            worker: "reporter".to_string(),
            has_job_settings: true,
            processor_id: "proc-1".to_string(),
        }
    }

    #[test]
    fn test_worker_command_line() {
        let launcher = ProcessWorkerLauncher::new("/usr/bin/drover", KillerBackend::ProcessGroup)
            .with_config_path("/etc/drover.yaml")
            .with_env("DROVER_STORE_KEY_PREFIX", "prod");
        let assignment = assignment();
        let cmd = launcher.command(&assignment);

        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0..3], ["--config", "/etc/drover.yaml", "worker"]);
        assert!(args.contains(&assignment.task_id.to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--with-job-settings"));
        assert!(cmd
            .get_envs()
            .any(|(k, v)| k == "DROVER_STORE_KEY_PREFIX" && v.is_some_and(|v| v == "prod")));
    }

    /// Blocks its caller's thread for every sweep
    struct SlowKiller {
        sweeps: Arc<AtomicUsize>,
    }

    impl ProcessTreeKiller for SlowKiller {
        fn backend(&self) -> KillerBackend {
            KillerBackend::ProcessGroup
        }

        fn prepare(&self, _command: &mut std::process::Command) {}

        fn add_process(&mut self, _pid: Option<u32>) -> ExecutionResult<()> {
            Ok(())
        }

        fn terminate_all(&mut self) -> ExecutionResult<usize> {
            std::thread::sleep(Duration::from_millis(300));
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "current_thread")]
    async fn test_tree_sweep_does_not_stall_the_runtime() {
        let sweeps = Arc::new(AtomicUsize::new(0));
        let child = Command::new("true").kill_on_drop(true).spawn().unwrap();
        let mut worker = WorkerProcess::new(
            child,
            Box::new(SlowKiller {
                sweeps: sweeps.clone(),
            }),
        );

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        assert_eq!(worker.wait().await.unwrap(), WorkerExit::Success);
        assert_eq!(sweeps.load(Ordering::SeqCst), 1);
        assert!(ticks.load(Ordering::SeqCst) >= 5, "runtime was blocked during the sweep");
        ticker.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_executable_is_a_spawn_error() {
        let launcher =
            ProcessWorkerLauncher::new("/nonexistent/drover-worker", KillerBackend::ProcessGroup);
        match launcher.launch(&assignment()).await {
            Err(ExecutionError::Spawn(_)) => {}
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("spawn should have failed"),
        }
    }
}
