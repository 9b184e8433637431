//! # Events emitted by the registry, scheduler, recovery engine and runtime.
//!
//! The [`EventKind`] enum classifies event types across five categories:
//! - **Task events**: registry CRUD and execution outcomes
//! - **Service events**: running-state changes and host lifecycle calls
//! - **Scheduler events**: loop lifecycle, visibility, failed cycles
//! - **Recovery events**: attempts and their outcomes
//! - **Runtime events**: shutdown and subscriber health
//!
//! The [`Event`] struct carries additional metadata such as timestamps, task id,
//! reasons, attempts and delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use taskwarden::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskError)
//!     .with_task("sync")
//!     .with_reason("boom")
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::TaskError);
//! assert_eq!(ev.task.as_deref(), Some("sync"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::host::Visibility;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Task events ===
    /// Persisted state was loaded (or the load failed and the registry started empty).
    ///
    /// Sets:
    /// - `attempt`: number of restored descriptors
    /// - `reason`: load error, if any
    Restored,

    /// Task was added. Sets `task`.
    TaskAdded,

    /// Task policy or action was replaced. Sets `task`.
    TaskUpdated,

    /// Task was removed (explicitly or after its one-shot run). Sets `task`.
    TaskRemoved,

    /// Every task was dropped at once.
    AllTasksRemoved,

    /// Task dispatch was halted. Sets `task`.
    TaskPaused,

    /// Paused task was rescheduled. Sets `task`.
    TaskResumed,

    /// An execution attempt is about to start.
    ///
    /// Sets:
    /// - `task`: task id
    /// - `attempt`: execution number (1-based, successes + failures)
    /// - `timeout_ms`: configured timeout
    TaskStarting,

    /// An execution attempt succeeded.
    ///
    /// Sets:
    /// - `task`: task id
    /// - `attempt`: execution number
    /// - `result`: value returned by the action
    TaskExecuted,

    /// An execution attempt failed (action error or timeout).
    ///
    /// Sets:
    /// - `task`: task id
    /// - `attempt`: execution number
    /// - `reason`: failure message
    TaskError,

    /// The timeout race was lost to the timer (always followed by `TaskError`).
    ///
    /// Sets:
    /// - `task`: task id
    /// - `timeout_ms`: configured timeout
    TimeoutHit,

    /// Registry could not write to (or read from) the durable store.
    ///
    /// Sets:
    /// - `reason`: store error
    PersistenceFailed,

    // === Service events ===
    /// Registry running flag was set.
    ///
    /// Sets:
    /// - `running`: new flag value
    ServiceStateChanged,

    /// Host service was started through the runtime.
    ServiceStarted,

    /// Host service notification/config was updated.
    ServiceUpdated,

    /// Host service was stopped through the runtime.
    ServiceStopped,

    /// Auto-restart on initialization was toggled. Sets `running` (= enabled).
    AutoRestartChanged,

    // === Scheduler events ===
    /// Scheduler loop started.
    SchedulerStarted,

    /// Scheduler loop stopped after draining in-flight work.
    SchedulerStopped,

    /// A poll cycle failed; the loop keeps going. Sets `reason`.
    SchedulerCycleFailed,

    /// Foreground/background transition observed.
    ///
    /// Sets:
    /// - `visibility`: new visibility
    /// - `delay_ms`: scheduler interval after the transition
    VisibilityChanged,

    // === Recovery events ===
    /// Registry expects the service running but the host reports it stopped.
    ServiceStateInconsistency,

    /// Host reported that it killed the service.
    ServiceKilled,

    /// Host reported that it restarted the service on its own.
    ServiceRestarted,

    /// A recovery attempt is being made.
    ///
    /// Sets:
    /// - `attempt`: attempt number (1-based)
    /// - `delay_ms`: backoff delay for this attempt
    RecoveryAttempt,

    /// The restart succeeded. Sets `attempt`.
    RecoverySuccess,

    /// The restart failed.
    ///
    /// Sets:
    /// - `attempt`: attempt number
    /// - `reason`: failure message
    /// - `running`: whether another attempt will be made
    RecoveryFailed,

    /// Attempt rejected inside the throttle window. Sets `delay_ms` (time left).
    RecoveryThrottled,

    /// Attempt ceiling reached. Sets `attempt`.
    RecoveryMaxAttemptsReached,

    // === Runtime events ===
    /// Shutdown requested (OS signal observed).
    ShutdownRequested,

    /// All in-flight work settled within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some actions were still running.
    GraceExceeded,

    /// Subscriber panicked during event processing. Sets `task` (subscriber) and `reason`.
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed). Sets `task` and `reason`.
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Task id (or subscriber name for subscriber events).
    pub task: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Execution or recovery attempt number (starting from 1).
    pub attempt: Option<u32>,
    /// Task timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Delay, interval or time-left in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Running flag for service events.
    pub running: Option<bool>,
    /// Visibility for `VisibilityChanged`.
    pub visibility: Option<Visibility>,
    /// Value returned by a successful action.
    pub result: Option<serde_json::Value>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            reason: None,
            attempt: None,
            timeout_ms: None,
            delay_ms: None,
            running: None,
            visibility: None,
            result: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a running flag.
    #[inline]
    pub fn with_running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    /// Attaches a visibility.
    #[inline]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Attaches an action result.
    #[inline]
    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    /// Returns the delay metadata as a [`Duration`].
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::new(EventKind::TaskAdded);
        let b = Event::new(EventKind::TaskAdded);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn durations_are_clamped_to_u32_millis() {
        let ev = Event::new(EventKind::RecoveryAttempt).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
        let ev = Event::new(EventKind::RecoveryAttempt).with_delay(Duration::from_millis(1500));
        assert_eq!(ev.delay(), Some(Duration::from_millis(1500)));
    }
}
