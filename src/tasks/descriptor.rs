//! # Serializable task metadata.
//!
//! [`TaskDescriptor`] holds everything about a task except its code: policy
//! and run bookkeeping. It is what the registry persists and restores.
//! [`TaskInfo`] is the read-only snapshot handed to callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tasks::options::Priority;

/// Policy and bookkeeping of one task. All times are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique id within the registry.
    pub id: String,
    /// Floored initial delay (ms).
    pub delay_ms: u64,
    /// Floored loop delay (ms).
    pub loop_delay_ms: u64,
    /// Whether the task repeats.
    pub looping: bool,
    /// Dispatch tier.
    pub priority: Priority,
    /// Per-run timeout (ms).
    pub timeout_ms: u64,
    /// Paused tasks are never due.
    pub paused: bool,
    /// Earliest time the task may run.
    pub next_execution_time: u64,
    /// Creation time.
    pub created_at: u64,
    /// Completion time of the last run, successful or not.
    pub last_executed_at: Option<u64>,
    /// Successful runs.
    pub execution_count: u64,
    /// Failed or timed-out runs.
    pub failure_count: u64,
    /// Registration order; breaks priority ties.
    #[serde(default)]
    pub seq: u64,
}

impl TaskDescriptor {
    /// `true` when not paused and `next_execution_time <= now_ms`.
    #[inline]
    pub fn is_due(&self, now_ms: u64) -> bool {
        !self.paused && self.next_execution_time <= now_ms
    }

    /// Initial delay as a [`Duration`].
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Loop delay as a [`Duration`].
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }

    /// Timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total finished runs.
    pub fn attempts(&self) -> u64 {
        self.execution_count + self.failure_count
    }
}

/// Read-only task snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    /// Policy and bookkeeping.
    #[serde(flatten)]
    pub descriptor: TaskDescriptor,
    /// Whether an action is attached (restored tasks have none until re-registered).
    pub has_action: bool,
    /// Whether a run is in flight right now.
    pub running: bool,
}
