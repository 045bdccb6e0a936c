//! Runtime information published by live processors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::entity::Entity;
use crate::task::TaskId;

/// Identity of the host a processor runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: String,
    pub pid: u32,
    pub version: String,
}

impl HostInfo {
    pub fn new(hostname: impl Into<String>, pid: u32) -> Self {
        Self {
            hostname: hostname.into(),
            pid,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Heartbeat record for one processor.
///
/// Expires on its own if heartbeats stop; an expired record means the
/// processor is presumed dead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub processor_id: String,
    pub host: HostInfo,
    pub heartbeat_at: DateTime<Utc>,
    #[serde(default)]
    pub executing: BTreeSet<TaskId>,
}

impl RuntimeInfo {
    pub fn is_executing(&self, task_id: &TaskId) -> bool {
        self.executing.contains(task_id)
    }
}

impl Entity for RuntimeInfo {
    const ENTITY_TYPE: &'static str = "runtime_info";
}
