//! # Task scheduling policy.
//!
//! [`TaskOptions`] is what callers hand to `add_task` / `update_task`. Every
//! field is optional:
//! - on **add**, unset fields take defaults (delay 0 → floored to 100ms, loop
//!   delay 5s, no loop, normal priority, runtime default timeout, not paused);
//! - on **update**, unset fields keep the task's current value.
//!
//! ## Floors
//! `delay` and `loop_delay` are clamped to [`MIN_DELAY`] (100ms).
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use taskwarden::{Priority, TaskOptions};
//!
//! let opts = TaskOptions::new()
//!     .id("sync-contacts")
//!     .delay(Duration::from_secs(1))
//!     .looping(Duration::from_secs(30))
//!     .priority(Priority::High)
//!     .timeout(Duration::from_secs(10));
//! assert_eq!(opts.task_id.as_deref(), Some("sync-contacts"));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::tasks::handle::{ErrorCallback, SuccessCallback};

/// Lower bound for `delay` and `loop_delay`.
pub const MIN_DELAY: Duration = Duration::from_millis(100);

/// Default pause between runs of a looping task.
pub(crate) const DEFAULT_LOOP_DELAY: Duration = Duration::from_secs(5);

/// Dispatch tier. Due tasks run high → normal → low; ties keep insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Dispatched first.
    High,
    /// Default tier.
    #[default]
    Normal,
    /// Dispatched last.
    Low,
}

impl Priority {
    /// Sort rank (lower runs first).
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// Caller-facing policy for add/update.
#[derive(Clone, Default)]
pub struct TaskOptions {
    /// Explicit id (add); generated when absent.
    pub task_id: Option<String>,
    /// Wait before the first eligible run.
    pub delay: Option<Duration>,
    /// Wait between runs of a looping task, measured from completion.
    pub loop_delay: Option<Duration>,
    /// Whether the task repeats.
    pub looping: Option<bool>,
    /// Dispatch tier.
    pub priority: Option<Priority>,
    /// Per-run timeout.
    pub timeout: Option<Duration>,
    /// Whether the task starts (or is set) paused.
    pub paused: Option<bool>,
    /// Called with the action result after a successful run.
    pub on_success: Option<SuccessCallback>,
    /// Called with the error after a failed or timed-out run.
    pub on_error: Option<ErrorCallback>,
    /// Update only: recompute `next_execution_time = now + delay`.
    pub reset_timer: bool,
}

impl TaskOptions {
    /// Empty options (all defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the task id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    /// Sets the initial delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes the task repeat every `loop_delay` after each completion.
    pub fn looping(mut self, loop_delay: Duration) -> Self {
        self.looping = Some(true);
        self.loop_delay = Some(loop_delay);
        self
    }

    /// Sets the loop flag without touching the loop delay.
    pub fn set_looping(mut self, looping: bool) -> Self {
        self.looping = Some(looping);
        self
    }

    /// Sets the dispatch tier.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the per-run timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the paused flag.
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    /// Installs a success callback.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Installs an error callback.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&TaskError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Requests a schedule reset on update.
    pub fn reset_timer(mut self) -> Self {
        self.reset_timer = true;
        self
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("task_id", &self.task_id)
            .field("delay", &self.delay)
            .field("loop_delay", &self.loop_delay)
            .field("looping", &self.looping)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("paused", &self.paused)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("reset_timer", &self.reset_timer)
            .finish()
    }
}

/// Applies the 100ms floor.
#[inline]
pub(crate) fn floor_delay(d: Duration) -> Duration {
    d.max(MIN_DELAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_high_first() {
        let mut tiers = vec![Priority::Low, Priority::High, Priority::Normal];
        tiers.sort_by_key(|p| p.rank());
        assert_eq!(tiers, vec![Priority::High, Priority::Normal, Priority::Low]);
    }

    #[test]
    fn priority_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Priority::High).expect("encode"),
            "\"high\""
        );
    }

    #[test]
    fn floor_applies_below_minimum_only() {
        assert_eq!(floor_delay(Duration::ZERO), MIN_DELAY);
        assert_eq!(
            floor_delay(Duration::from_millis(250)),
            Duration::from_millis(250)
        );
    }
}
