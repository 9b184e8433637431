//! # LogWriter: events as `tracing` records.
//!
//! Renders every [`Event`] as one structured record under the
//! `taskwarden::events` target. Failures are logged at `WARN`, lifecycle
//! transitions at `INFO`, per-run chatter at `DEBUG`. Install any
//! `tracing` subscriber to see them.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO taskwarden::events: task added task="sync"
//! DEBUG taskwarden::events: task starting task="sync" attempt=1 timeout_ms=15000
//! WARN taskwarden::events: task error task="sync" attempt=1 reason="timed out after 15s"
//! INFO taskwarden::events: recovery attempt attempt=2 delay_ms=2000
//! ```

use async_trait::async_trait;
use tracing::{Level, debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber writing events to `tracing`.
#[derive(Debug, Clone, Copy)]
pub struct LogWriter {
    min_level: Level,
}

impl LogWriter {
    /// Logs everything down to `DEBUG`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            min_level: Level::DEBUG,
        }
    }

    /// Drops records less severe than `level`.
    #[must_use]
    pub fn with_min_level(level: Level) -> Self {
        Self { min_level: level }
    }

    fn level_of(kind: EventKind) -> Level {
        use EventKind::*;
        match kind {
            TaskError
            | TimeoutHit
            | PersistenceFailed
            | SchedulerCycleFailed
            | ServiceStateInconsistency
            | ServiceKilled
            | RecoveryFailed
            | RecoveryMaxAttemptsReached
            | GraceExceeded
            | SubscriberPanicked
            | SubscriberOverflow => Level::WARN,
            TaskStarting | TaskExecuted | VisibilityChanged | RecoveryThrottled => Level::DEBUG,
            _ => Level::INFO,
        }
    }

    fn label(kind: EventKind) -> &'static str {
        use EventKind::*;
        match kind {
            Restored => "registry restored",
            TaskAdded => "task added",
            TaskUpdated => "task updated",
            TaskRemoved => "task removed",
            AllTasksRemoved => "all tasks removed",
            TaskPaused => "task paused",
            TaskResumed => "task resumed",
            TaskStarting => "task starting",
            TaskExecuted => "task executed",
            TaskError => "task error",
            TimeoutHit => "task timeout",
            PersistenceFailed => "persistence failed",
            ServiceStateChanged => "service state changed",
            ServiceStarted => "service started",
            ServiceUpdated => "service updated",
            ServiceStopped => "service stopped",
            AutoRestartChanged => "auto-restart changed",
            SchedulerStarted => "scheduler started",
            SchedulerStopped => "scheduler stopped",
            SchedulerCycleFailed => "scheduler cycle failed",
            VisibilityChanged => "visibility changed",
            ServiceStateInconsistency => "service state inconsistency",
            ServiceKilled => "service killed",
            ServiceRestarted => "service restarted",
            RecoveryAttempt => "recovery attempt",
            RecoverySuccess => "recovery success",
            RecoveryFailed => "recovery failed",
            RecoveryThrottled => "recovery throttled",
            RecoveryMaxAttemptsReached => "recovery attempts exhausted",
            ShutdownRequested => "shutdown requested",
            AllStoppedWithin => "all stopped within grace",
            GraceExceeded => "grace exceeded",
            SubscriberPanicked => "subscriber panicked",
            SubscriberOverflow => "subscriber overflow",
        }
    }
}

impl Default for LogWriter {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! emit {
    ($mac:ident, $e:expr, $msg:expr) => {
        $mac!(
            target: "taskwarden::events",
            seq = $e.seq,
            task = $e.task.as_deref(),
            attempt = $e.attempt,
            timeout_ms = $e.timeout_ms,
            delay_ms = $e.delay_ms,
            running = $e.running,
            visibility = $e.visibility.map(tracing::field::display),
            reason = $e.reason.as_deref(),
            "{}",
            $msg
        )
    };
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let level = Self::level_of(e.kind);
        if level > self.min_level {
            return;
        }
        let msg = Self::label(e.kind);
        if level == Level::WARN {
            emit!(warn, e, msg);
        } else if level == Level::INFO {
            emit!(info, e, msg);
        } else {
            emit!(debug, e, msg);
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_warnings() {
        assert_eq!(LogWriter::level_of(EventKind::TaskError), Level::WARN);
        assert_eq!(LogWriter::level_of(EventKind::TaskAdded), Level::INFO);
        assert_eq!(LogWriter::level_of(EventKind::TaskStarting), Level::DEBUG);
    }

    #[tokio::test]
    async fn filtered_levels_are_skipped() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let writer = LogWriter::with_min_level(Level::WARN);
        writer
            .on_event(&Event::new(EventKind::TaskStarting).with_task("quiet"))
            .await;
        writer
            .on_event(&Event::new(EventKind::TaskError).with_reason("loud"))
            .await;
    }
}
