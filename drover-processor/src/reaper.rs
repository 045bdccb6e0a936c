//! Failing tasks whose processor stopped heartbeating

use chrono::Utc;
use drover_core::{DroverError, TaskSummary};
use drover_ipc::CompletionNotice;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deps::ProcessorDeps;
use crate::error::ProcessorResult;

/// Marks running tasks of dead processors as failed.
///
/// A task is an orphan when its summary is not terminal and names a
/// processor whose runtime info has expired. Each orphan is handled under
/// its task lock, so only one reaper finalizes it.
#[derive(Clone)]
pub struct OrphanReaper {
    deps: ProcessorDeps,
    processor_id: String,
}

impl OrphanReaper {
    pub fn new(deps: ProcessorDeps, processor_id: impl Into<String>) -> Self {
        Self {
            deps,
            processor_id: processor_id.into(),
        }
    }

    /// One sweep over all summaries; returns how many tasks were reaped
    pub async fn reap_once(&self) -> ProcessorResult<usize> {
        let mut liveness: HashMap<String, bool> = HashMap::new();
        let mut reaped = 0;

        for summary in self.deps.summaries.list().await? {
            if summary.status.is_terminal() {
                continue;
            }
            let Some(owner) = summary.processor_id.clone() else {
                continue;
            };
            let alive = match liveness.get(&owner) {
                Some(alive) => *alive,
                None => {
                    let alive = self.deps.runtime.is_active(&owner).await?;
                    liveness.insert(owner.clone(), alive);
                    alive
                }
            };
            if !alive && self.reap(&summary, &owner).await? {
                reaped += 1;
            }
        }

        if reaped > 0 {
            info!(reaped, "Reaped orphaned tasks");
        }
        Ok(reaped)
    }

    async fn reap(&self, candidate: &TaskSummary, owner: &str) -> ProcessorResult<bool> {
        let task_id = candidate.task_id;
        let Some(lock) = self
            .deps
            .locks
            .try_acquire(&self.deps.keys.task_lock(task_id))
            .await?
        else {
            debug!(task_id = %task_id, "Orphan candidate is locked, skipping");
            return Ok(false);
        };

        // The owner may have finalized it between the listing and the lock.
        let mut summary = match self.deps.summaries.get(&task_id).await? {
            Some(summary) if !summary.status.is_terminal() => summary,
            _ => {
                lock.release().await?;
                return Ok(false);
            }
        };

        summary.fail(
            DroverError::WorkerFault(format!("processor '{}' stopped heartbeating", owner))
                .to_string(),
            None,
            Utc::now(),
        );
        self.deps.summaries.save(&summary).await?;
        self.deps.tasks.remove(&task_id).await?;
        if let Err(e) = self.deps.channels.clear(&task_id).await {
            warn!(task_id = %task_id, "Failed to clear task records: {}", e);
        }

        let notice = CompletionNotice {
            task_id,
            task_type: summary.task_type.clone(),
            status: summary.status,
            processor_id: self.processor_id.clone(),
        };
        if let Err(e) = self.deps.channels.completion_publisher().publish(notice).await {
            warn!(task_id = %task_id, "Failed to publish completion: {}", e);
        }
        lock.release().await?;
        warn!(task_id = %task_id, owner = %owner, "Failed orphaned task");
        Ok(true)
    }

    /// Sweep every `interval` until `stop` is cancelled
    pub async fn run(self, interval: Duration, stop: CancellationToken) {
        let mut ticks = interval_at(Instant::now() + interval, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticks.tick() => {
                    if let Err(e) = self.reap_once().await {
                        warn!("Orphan sweep failed: {}", e);
                    }
                }
            }
        }
    }
}
