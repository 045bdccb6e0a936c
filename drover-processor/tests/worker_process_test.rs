#![cfg(target_os = "linux")]

use async_trait::async_trait;
use drover_config::{
    DroverConfig, IsolationMode, KillerBackend, StoreConfig, WorkerMapping, WorkersConfig,
};
use drover_core::{Task, TaskId, TaskStatus, TaskSummary};
use drover_execution::{
    create_killer, ExecutionError, ExecutionResult, WorkerAssignment, WorkerHandle,
    WorkerLauncher, WorkerProcess,
};
use drover_processor::{ProcessorDeps, TaskProcessor};
use drover_store::{InMemoryStore, StoreProvider};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Records "<background pid> <shell pid>", logs SIGTERM, then waits on the
/// background sleep
const SCRIPT: &str = r#"
trap 'echo term >> "$DIR/$TASK.signals"; exit 0' TERM
sleep 30 &
echo "$! $$" > "$DIR/$TASK.tmp"
mv "$DIR/$TASK.tmp" "$DIR/$TASK.pids"
wait
"#;

/// Runs every task as a shell worker under the supervisor killer
struct ShellLauncher {
    dir: PathBuf,
}

#[async_trait]
impl WorkerLauncher for ShellLauncher {
    async fn launch(&self, assignment: &WorkerAssignment) -> ExecutionResult<Box<dyn WorkerHandle>> {
        let mut cmd = std::process::Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(SCRIPT)
            .env("DIR", &self.dir)
            .env("TASK", assignment.task_id.to_string());
        let mut killer = create_killer(KillerBackend::Supervisor);
        killer.prepare(&mut cmd);

        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| ExecutionError::Spawn(e.to_string()))?;
        killer.add_process(child.id())?;
        Ok(Box::new(WorkerProcess::new(child, killer)))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    pids_dir: PathBuf,
    deps: ProcessorDeps,
    processor: TaskProcessor,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DroverConfig::default();
    config.store = StoreConfig::in_memory("shell");
    config.workers = WorkersConfig::new()
        .with("shell", WorkerMapping::new("shell"))
        .with(
            "slow-shell",
            WorkerMapping::new("shell").with_timeout(Duration::from_millis(300)),
        );
    config.processor.processor_id = Some("shell-proc".to_string());
    config.processor.isolation = IsolationMode::Process;
    config.processor.poll_interval = Duration::from_millis(20);
    config.processor.heartbeat_interval = Duration::from_millis(200);
    config.processor.shutdown_grace_period = Duration::from_millis(300);
    config.processor.cancel_grace_period = Duration::from_secs(2);

    let store: Arc<dyn StoreProvider> = Arc::new(InMemoryStore::new());
    let launcher = Arc::new(ShellLauncher {
        dir: dir.path().to_path_buf(),
    });
    let deps = ProcessorDeps::new(store.clone(), &config, launcher.clone());
    let processor = TaskProcessor::new(&config, ProcessorDeps::new(store, &config, launcher));
    Fixture {
        pids_dir: dir.path().to_path_buf(),
        _dir: dir,
        deps,
        processor,
    }
}

async fn submit(deps: &ProcessorDeps, task_type: &str) -> TaskId {
    let task = Task::new(task_type, Vec::new());
    deps.tasks.enqueue(&task).await.unwrap();
    task.id
}

/// (background sleep, shell) once the worker has started
async fn wait_for_pids(dir: &Path, task_id: &TaskId) -> (i32, i32) {
    let path = dir.join(format!("{}.pids", task_id));
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                let pids: Vec<i32> = content
                    .split_whitespace()
                    .filter_map(|pid| pid.parse().ok())
                    .collect();
                if let [background, shell] = pids[..] {
                    return (background, shell);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker never recorded its pids")
}

async fn wait_for_terminal(deps: &ProcessorDeps, task_id: &TaskId) -> TaskSummary {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(summary) = deps.summaries.get(task_id).await.unwrap() {
                if summary.status.is_terminal() {
                    return summary;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task never finished")
}

async fn eventually_gone(pid: i32) -> bool {
    for _ in 0..100 {
        if !Path::new(&format!("/proc/{}", pid)).exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_worker_killed_from_outside_fails_and_leaves_no_descendants() {
    let f = fixture();
    f.processor.start().await.unwrap();

    let task_id = submit(&f.deps, "shell").await;
    let (background, shell) = wait_for_pids(&f.pids_dir, &task_id).await;
    kill(Pid::from_raw(shell), Signal::SIGKILL).unwrap();

    let summary = wait_for_terminal(&f.deps, &task_id).await;
    assert_eq!(summary.status, TaskStatus::Failed);
    let error = summary.error.unwrap_or_default();
    assert!(error.starts_with("Worker fault"), "{}", error);
    assert!(error.contains("without reporting an outcome"), "{}", error);
    assert!(eventually_gone(background).await, "background sleep {} survived", background);

    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_worker_is_asked_to_exit_before_the_tree_is_killed() {
    let f = fixture();
    f.processor.start().await.unwrap();

    let task_id = submit(&f.deps, "slow-shell").await;
    let (background, _shell) = wait_for_pids(&f.pids_dir, &task_id).await;

    let summary = wait_for_terminal(&f.deps, &task_id).await;
    assert_eq!(summary.status, TaskStatus::Failed);
    assert!(summary.error.unwrap_or_default().contains("timed out"));

    let signals = tokio::fs::read_to_string(f.pids_dir.join(format!("{}.signals", task_id)))
        .await
        .unwrap();
    assert_eq!(signals.trim(), "term");
    assert!(eventually_gone(background).await, "background sleep {} survived", background);

    f.processor.stop().await.unwrap();
}
