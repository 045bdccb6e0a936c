use chrono::Utc;
use drover_config::{QueueConfig, ScheduledTaskConfig, SchedulerConfig, SerializationConfig};
use drover_core::{HostInfo, TaskOutput, TaskSummary, TaskType};
use drover_scheduler::{ScheduleRunner, SchedulerDeps, SkipReason, TaskScheduler, TickOutcome};
use drover_storage::{EntityCodec, RuntimeInfoRepository, TaskRepository, TaskSummaryStore};
use drover_store::{InMemoryStore, KeySpace, LockManager, StoreProvider};
use std::sync::Arc;
use std::time::Duration;

fn deps() -> SchedulerDeps {
    let store: Arc<dyn StoreProvider> = Arc::new(InMemoryStore::new());
    let keys = KeySpace::new("test");
    let codec = EntityCodec::new(SerializationConfig::default());
    SchedulerDeps {
        locks: LockManager::new(store.clone(), Duration::from_secs(5), Duration::from_millis(10)),
        tasks: TaskRepository::new(store.clone(), keys.clone(), QueueConfig::default(), codec.clone()),
        summaries: TaskSummaryStore::new(store.clone(), keys.clone(), codec.clone()),
        runtime: RuntimeInfoRepository::new(
            store.clone(),
            keys.clone(),
            codec,
            Duration::from_secs(5),
        ),
        store,
        keys,
    }
}

fn submitted(outcome: TickOutcome) -> drover_core::TaskId {
    match outcome {
        TickOutcome::Submitted(id) => id,
        other => panic!("expected a submission, got {:?}", other),
    }
}

#[tokio::test]
async fn test_wait_for_previous_skips_until_previous_is_terminal() {
    let deps = deps();
    let report = TaskType::new("report");
    let runner = ScheduleRunner::new(
        ScheduledTaskConfig::every("report", Duration::from_secs(60))
            .waiting_for_previous()
            .with_payload(serde_json::json!({"rows": 10})),
        deps.clone(),
    );

    let first = submitted(runner.tick().await.unwrap());
    assert_eq!(
        runner.tick().await.unwrap(),
        TickOutcome::Skipped(SkipReason::PreviousStillLive(first))
    );

    // A processor claims it and starts running it.
    let task = deps.tasks.dequeue(&report).await.unwrap().unwrap();
    assert_eq!(task.id, first);
    deps.runtime
        .heartbeat("proc-1", &HostInfo::new("host-a", 1))
        .await
        .unwrap();
    let mut summary = TaskSummary::running(&task, "proc-1", Utc::now());
    deps.summaries.save(&summary).await.unwrap();
    assert_eq!(
        runner.tick().await.unwrap(),
        TickOutcome::Skipped(SkipReason::PreviousStillLive(first))
    );
    assert_eq!(deps.tasks.queue_length(&report).await.unwrap(), 0);

    summary.complete(TaskOutput::new(), Utc::now());
    deps.summaries.save(&summary).await.unwrap();
    deps.tasks.remove(&first).await.unwrap();

    let second = submitted(runner.tick().await.unwrap());
    assert_ne!(second, first);
    assert_eq!(deps.tasks.queue_length(&report).await.unwrap(), 1);
    assert_eq!(
        runner.tick().await.unwrap(),
        TickOutcome::Skipped(SkipReason::PreviousStillLive(second))
    );
}

#[tokio::test]
async fn test_previous_on_dead_processor_does_not_block() {
    let deps = deps();
    let runner = ScheduleRunner::new(
        ScheduledTaskConfig::every("report", Duration::from_secs(60)).waiting_for_previous(),
        deps.clone(),
    );

    let first = submitted(runner.tick().await.unwrap());
    let task = deps.tasks.dequeue(&TaskType::new("report")).await.unwrap().unwrap();
    deps.summaries
        .save(&TaskSummary::running(&task, "proc-gone", Utc::now()))
        .await
        .unwrap();

    let second = submitted(runner.tick().await.unwrap());
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_without_wait_every_tick_submits() {
    let deps = deps();
    let runner = ScheduleRunner::new(
        ScheduledTaskConfig::every("report", Duration::from_secs(60)),
        deps.clone(),
    );

    for _ in 0..3 {
        submitted(runner.tick().await.unwrap());
    }
    assert_eq!(
        deps.tasks.queue_length(&TaskType::new("report")).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_contended_schedule_lock_skips() {
    let deps = deps();
    let runner = ScheduleRunner::new(
        ScheduledTaskConfig::every("report", Duration::from_secs(60)),
        deps.clone(),
    );
    let held = deps
        .locks
        .acquire(&deps.keys.schedule_lock("report"), Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(runner.run_tick().await, Some(TickOutcome::Skipped(SkipReason::LockContended)));
    assert_eq!(
        deps.tasks.queue_length(&TaskType::new("report")).await.unwrap(),
        0
    );

    held.release().await.unwrap();
    submitted(runner.tick().await.unwrap());

    let status = runner.status();
    assert_eq!(status.skipped, 1);
    assert_eq!(status.submitted, 0);
    assert!(status.last_tick.is_some());
}

#[tokio::test]
async fn test_submitted_task_carries_payload_and_tenant() {
    let deps = deps();
    let mut config = ScheduledTaskConfig::every("report", Duration::from_secs(60))
        .with_payload(serde_json::json!({"rows": 10}));
    config.tenant_id = "acme".to_string();
    let runner = ScheduleRunner::new(config, deps.clone());

    let id = submitted(runner.tick().await.unwrap());
    let task = deps.tasks.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(task.tenant_id, "acme");
    let payload: serde_json::Value = deps.tasks.codec().decode_payload(&task.payload).unwrap();
    assert_eq!(payload["rows"], 10);
    assert_eq!(runner.last_submitted().await.unwrap(), Some(id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interval_job_submits_once_while_previous_is_queued() {
    let deps = deps();
    let config = SchedulerConfig {
        enabled: true,
        tasks: vec![
            ScheduledTaskConfig::every("report", Duration::from_secs(1)).waiting_for_previous(),
        ],
    };
    let scheduler = TaskScheduler::new(&config, deps.clone());

    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());
    assert!(scheduler.start().await.is_err());
    tokio::time::sleep(Duration::from_millis(3500)).await;
    scheduler.stop().await.unwrap();

    assert_eq!(
        deps.tasks.queue_length(&TaskType::new("report")).await.unwrap(),
        1
    );
    let status = &scheduler.statuses()[0];
    assert_eq!(status.submitted, 1);
    assert!(status.skipped >= 1);
}

#[tokio::test]
async fn test_disabled_schedules_get_no_runner() {
    let mut disabled = ScheduledTaskConfig::every("export", Duration::from_secs(1));
    disabled.enabled = false;
    let config = SchedulerConfig {
        enabled: true,
        tasks: vec![
            ScheduledTaskConfig::every("report", Duration::from_secs(1)),
            disabled,
        ],
    };
    let scheduler = TaskScheduler::new(&config, deps());
    assert_eq!(scheduler.runners().len(), 1);

    let outcomes = scheduler.tick_all().await;
    assert!(matches!(outcomes[0], Some(TickOutcome::Submitted(_))));
}
