use async_trait::async_trait;
use drover_config::{DroverConfig, IsolationMode, StoreConfig, WorkerMapping, WorkersConfig};
use drover_core::{HostInfo, Task, TaskId, TaskOutput, TaskStatus, TaskSummary};
use drover_execution::{
    LocalWorkerLauncher, ProgressTracker, TaskWorker, WorkerContext, WorkerRegistry,
    WorkerTaskError,
};
use drover_processor::{ProcessorDeps, ProcessorError, ProcessorState, TaskProcessor};
use drover_store::{InMemoryStore, StoreOp, StoreProvider, StoreResult, Subscription};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Serialize, Deserialize)]
struct Units {
    millis: Vec<u64>,
}

/// Sleeps through each unit, stopping early when cancelled
struct UnitWorker;

#[async_trait]
impl TaskWorker for UnitWorker {
    fn name(&self) -> &str {
        "units"
    }

    async fn start_task(&self, ctx: &WorkerContext) -> Result<TaskOutput, WorkerTaskError> {
        let units: Units = ctx.payload()?;
        let mut tracker = ProgressTracker::for_units(units.millis.iter().map(|m| *m as f64));
        for millis in &units.millis {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(*millis)) => {}
                _ = ctx.cancelled() => return Err(WorkerTaskError::Cancelled),
            }
            tracker.advance(*millis as f64);
            ctx.report_tracker(&tracker, None);
        }
        Ok(TaskOutput::new().with_message(format!("{} units", units.millis.len())))
    }
}

struct FailingWorker;

#[async_trait]
impl TaskWorker for FailingWorker {
    fn name(&self) -> &str {
        "fail"
    }

    async fn start_task(&self, _ctx: &WorkerContext) -> Result<TaskOutput, WorkerTaskError> {
        Err(WorkerTaskError::failed_with_details("export failed", "disk full"))
    }
}

/// Never checks for cancellation
struct StubbornWorker;

#[async_trait]
impl TaskWorker for StubbornWorker {
    fn name(&self) -> &str {
        "stubborn"
    }

    async fn start_task(&self, _ctx: &WorkerContext) -> Result<TaskOutput, WorkerTaskError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(TaskOutput::new())
    }
}

fn registry() -> WorkerRegistry {
    WorkerRegistry::new()
        .with(Arc::new(UnitWorker))
        .with(Arc::new(FailingWorker))
        .with(Arc::new(StubbornWorker))
}

fn config(processor_id: &str) -> DroverConfig {
    let mut config = DroverConfig::default();
    config.store = StoreConfig::in_memory("test");
    config.workers = WorkersConfig::new()
        .with("units", WorkerMapping::new("units"))
        .with("fail", WorkerMapping::new("fail"))
        .with(
            "stubborn",
            WorkerMapping::new("stubborn").with_timeout(Duration::from_millis(300)),
        )
        .with("patient", WorkerMapping::new("stubborn"))
        .with("mystery", WorkerMapping::new("nobody"));
    config.processor.processor_id = Some(processor_id.to_string());
    config.processor.isolation = IsolationMode::Local;
    config.processor.poll_interval = Duration::from_millis(20);
    config.processor.heartbeat_interval = Duration::from_millis(200);
    config.processor.runtime_info_ttl = Duration::from_secs(2);
    config.processor.shutdown_grace_period = Duration::from_millis(300);
    config.processor.cancel_grace_period = Duration::from_millis(300);
    config
}

/// In-memory store whose compare-and-delete, and so every lock release,
/// takes `delay`
struct SlowReleaseStore {
    inner: InMemoryStore,
    delay: Duration,
}

#[async_trait]
impl StoreProvider for SlowReleaseStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn push_queue(&self, key: &str, value: &[u8]) -> StoreResult<usize> {
        self.inner.push_queue(key, value).await
    }

    async fn pop_queue(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.pop_queue(key).await
    }

    async fn peek_queue(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.peek_queue(key).await
    }

    async fn take_queue_entry(
        &self,
        from: &str,
        value: &[u8],
        to: Option<&str>,
    ) -> StoreResult<bool> {
        self.inner.take_queue_entry(from, value, to).await
    }

    async fn queue_len(&self, key: &str) -> StoreResult<usize> {
        self.inner.queue_len(key).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.hash_get(key, field).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.inner.hash_delete(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        self.inner.hash_get_all(key).await
    }

    async fn run_transaction(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        self.inner.run_transaction(ops).await
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> StoreResult<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_if_equals(key, expected).await
    }

    async fn refresh_if_equals(
        &self,
        key: &str,
        expected: &[u8],
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.inner.refresh_if_equals(key, expected, ttl).await
    }

    async fn publish(&self, channel: &str, message: &[u8]) -> StoreResult<usize> {
        self.inner.publish(channel, message).await
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        self.inner.subscribe(channel).await
    }

    async fn server_time_utc(&self) -> StoreResult<chrono::DateTime<chrono::Utc>> {
        self.inner.server_time_utc().await
    }
}

fn processor_on(store: Arc<dyn StoreProvider>, config: &DroverConfig) -> TaskProcessor {
    let host = ProcessorDeps::worker_host(store.clone(), config, registry());
    let deps = ProcessorDeps::new(store, config, Arc::new(LocalWorkerLauncher::new(host)));
    TaskProcessor::new(config, deps)
}

struct Fixture {
    deps: ProcessorDeps,
    processor: TaskProcessor,
}

fn fixture() -> Fixture {
    let config = config("proc-1");
    let store: Arc<dyn StoreProvider> = Arc::new(InMemoryStore::new());
    let deps = ProcessorDeps::new(
        store.clone(),
        &config,
        Arc::new(LocalWorkerLauncher::new(ProcessorDeps::worker_host(
            store.clone(),
            &config,
            registry(),
        ))),
    );
    Fixture {
        processor: processor_on(store, &config),
        deps,
    }
}

async fn submit(deps: &ProcessorDeps, task_type: &str, millis: Vec<u64>) -> TaskId {
    let payload = deps.tasks.codec().encode_payload(&Units { millis }).unwrap();
    let task = Task::new(task_type, payload);
    deps.tasks.enqueue(&task).await.unwrap();
    task.id
}

async fn wait_for_summary(
    deps: &ProcessorDeps,
    task_id: &TaskId,
    done: impl Fn(&TaskSummary) -> bool,
) -> TaskSummary {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(summary) = deps.summaries.get(task_id).await.unwrap() {
                if done(&summary) {
                    return summary;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("summary did not reach the expected state")
}

async fn wait_for_terminal(deps: &ProcessorDeps, task_id: &TaskId) -> TaskSummary {
    wait_for_summary(deps, task_id, |s| s.status.is_terminal()).await
}

#[tokio::test]
async fn test_task_runs_to_completion() {
    let f = fixture();
    f.processor.start().await.unwrap();
    assert_eq!(f.processor.state(), ProcessorState::Running);
    assert!(f.deps.runtime.is_active("proc-1").await.unwrap());

    let task_id = submit(&f.deps, "units", vec![10, 40, 20]).await;
    let summary = wait_for_terminal(&f.deps, &task_id).await;

    assert_eq!(summary.status, TaskStatus::Completed);
    assert_eq!(summary.progress, 100.0);
    assert_eq!(summary.message.as_deref(), Some("3 units"));
    assert_eq!(summary.processor_id.as_deref(), Some("proc-1"));
    assert!(summary.finished_at.is_some());

    // Finalized tasks leave the queue and the task table.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!f.deps.tasks.contains(&task_id).await.unwrap());
    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_failure_is_recorded() {
    let f = fixture();
    f.processor.start().await.unwrap();

    let task_id = submit(&f.deps, "fail", vec![]).await;
    let summary = wait_for_terminal(&f.deps, &task_id).await;

    assert_eq!(summary.status, TaskStatus::Failed);
    assert_eq!(summary.error.as_deref(), Some("export failed"));
    assert_eq!(summary.error_details.as_deref(), Some("disk full"));
    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_unregistered_worker_is_a_worker_fault() {
    let f = fixture();
    f.processor.start().await.unwrap();

    let task_id = submit(&f.deps, "mystery", vec![]).await;
    let summary = wait_for_terminal(&f.deps, &task_id).await;

    assert_eq!(summary.status, TaskStatus::Failed);
    assert!(summary
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("Worker fault"));
    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_running_task() {
    let f = fixture();
    f.processor.start().await.unwrap();

    let task_id = submit(&f.deps, "units", vec![50, 10_000]).await;
    wait_for_summary(&f.deps, &task_id, |s| s.progress > 0.0).await;

    f.processor
        .cancel_task(&task_id, Some("operator".to_string()))
        .await
        .unwrap();
    let summary = wait_for_terminal(&f.deps, &task_id).await;

    assert_eq!(summary.status, TaskStatus::Cancelled);
    assert!(summary.progress < 100.0);
    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_before_claim_skips_the_worker() {
    let f = fixture();
    let task_id = submit(&f.deps, "units", vec![10_000]).await;
    f.processor.cancel_task(&task_id, None).await.unwrap();

    f.processor.start().await.unwrap();
    let summary = wait_for_terminal(&f.deps, &task_id).await;

    assert_eq!(summary.status, TaskStatus::Cancelled);
    assert_eq!(summary.progress, 0.0);
    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_ignoring_cancel_is_killed() {
    let f = fixture();
    f.processor.start().await.unwrap();

    let task_id = submit(&f.deps, "patient", vec![]).await;
    wait_for_summary(&f.deps, &task_id, |s| s.status == TaskStatus::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    f.processor.cancel_task(&task_id, None).await.unwrap();

    let summary = wait_for_terminal(&f.deps, &task_id).await;
    assert_eq!(summary.status, TaskStatus::Cancelled);
    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_task_timeout_is_a_worker_fault() {
    let f = fixture();
    f.processor.start().await.unwrap();

    let task_id = submit(&f.deps, "stubborn", vec![]).await;
    let summary = wait_for_terminal(&f.deps, &task_id).await;

    assert_eq!(summary.status, TaskStatus::Failed);
    let error = summary.error.unwrap_or_default();
    assert!(error.starts_with("Worker fault"), "{}", error);
    assert!(error.contains("timed out"), "{}", error);
    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_cancels_in_flight_work_and_signals_stopped() {
    let f = fixture();
    f.processor.start().await.unwrap();

    let task_id = submit(&f.deps, "units", vec![20, 10_000]).await;
    wait_for_summary(&f.deps, &task_id, |s| s.progress > 0.0).await;
    assert!(f.processor.active_tasks() >= 1);

    let mut state = f.processor.subscribe_state();
    let (stopped, ()) = tokio::join!(
        async {
            state
                .wait_for(|s| *s == ProcessorState::Stopped)
                .await
                .map(|s| *s)
        },
        async { f.processor.stop().await.unwrap() }
    );
    assert_eq!(stopped.unwrap(), ProcessorState::Stopped);
    f.processor.wait_stopped().await;

    let summary = f.deps.summaries.get(&task_id).await.unwrap().unwrap();
    assert_eq!(summary.status, TaskStatus::Cancelled);
    assert_eq!(f.processor.active_tasks(), 0);
    assert!(!f.deps.runtime.is_active("proc-1").await.unwrap());
}

#[tokio::test]
async fn test_stop_waits_for_tasks_still_finalizing_after_the_forced_phase() {
    let config = config("proc-slow");
    let store: Arc<dyn StoreProvider> = Arc::new(SlowReleaseStore {
        inner: InMemoryStore::new(),
        delay: Duration::from_secs(1),
    });
    let processor = processor_on(store.clone(), &config);
    let deps = ProcessorDeps::new(
        store.clone(),
        &config,
        Arc::new(LocalWorkerLauncher::new(ProcessorDeps::worker_host(
            store,
            &config,
            registry(),
        ))),
    );
    processor.start().await.unwrap();

    let task_id = submit(&deps, "patient", vec![]).await;
    wait_for_summary(&deps, &task_id, |s| s.status == TaskStatus::Running).await;

    // the task ignores cancellation and its lock release outlasts every phase
    processor.stop().await.unwrap();
    assert_eq!(processor.state(), ProcessorState::Stopped);
    assert_eq!(processor.active_tasks(), 0);

    let summary = deps.summaries.get(&task_id).await.unwrap().unwrap();
    assert_eq!(summary.status, TaskStatus::Cancelled);
    assert!(deps
        .store
        .get(&deps.keys.task_lock(task_id))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_lifecycle_transitions_are_checked() {
    let f = fixture();

    // Stopping a processor that never started is immediate.
    f.processor.stop().await.unwrap();
    assert_eq!(f.processor.state(), ProcessorState::Stopped);

    let err = f.processor.start().await.unwrap_err();
    assert!(matches!(
        err,
        ProcessorError::InvalidState {
            action: "start",
            state: ProcessorState::Stopped
        }
    ));
    f.processor.stop().await.unwrap();
}

#[tokio::test]
async fn test_reaper_fails_tasks_of_dead_processors() {
    let f = fixture();
    let now = chrono::Utc::now();

    let orphan = Task::new("units", vec![]);
    f.deps.tasks.enqueue(&orphan).await.unwrap();
    f.deps
        .summaries
        .save(&TaskSummary::running(&orphan, "ghost", now))
        .await
        .unwrap();

    let owned = Task::new("units", vec![]);
    f.deps
        .runtime
        .heartbeat("alive", &HostInfo::new("host-b", 7))
        .await
        .unwrap();
    f.deps
        .summaries
        .save(&TaskSummary::running(&owned, "alive", now))
        .await
        .unwrap();

    let reaper = f.processor.reaper();
    assert_eq!(reaper.reap_once().await.unwrap(), 1);
    assert_eq!(reaper.reap_once().await.unwrap(), 0);

    let reaped = f.deps.summaries.get(&orphan.id).await.unwrap().unwrap();
    assert_eq!(reaped.status, TaskStatus::Failed);
    assert_eq!(
        reaped.error.as_deref(),
        Some("Worker fault: processor 'ghost' stopped heartbeating")
    );
    assert!(!f.deps.tasks.contains(&orphan.id).await.unwrap());

    let untouched = f.deps.summaries.get(&owned.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, TaskStatus::Running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_processors_run_each_task_once() {
    let store: Arc<dyn StoreProvider> = Arc::new(InMemoryStore::new());
    let first = processor_on(store.clone(), &config("proc-a"));
    let second = processor_on(store.clone(), &config("proc-b"));
    let deps = ProcessorDeps::new(
        store.clone(),
        &config("client"),
        Arc::new(LocalWorkerLauncher::new(ProcessorDeps::worker_host(
            store,
            &config("client"),
            registry(),
        ))),
    );
    let mut completions = deps.channels.subscribe_completions().await.unwrap();

    let mut submitted = Vec::new();
    for _ in 0..8 {
        submitted.push(submit(&deps, "units", vec![10]).await);
    }
    first.start().await.unwrap();
    second.start().await.unwrap();

    let mut finished = HashSet::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while finished.len() < submitted.len() {
            let notice = completions.receive().await.unwrap().message;
            assert_eq!(notice.status, TaskStatus::Completed);
            assert!(finished.insert(notice.task_id), "task finalized twice");
        }
    })
    .await
    .unwrap();

    for task_id in &submitted {
        let summary = deps.summaries.get(task_id).await.unwrap().unwrap();
        assert_eq!(summary.status, TaskStatus::Completed);
    }
    first.stop().await.unwrap();
    second.stop().await.unwrap();
}
