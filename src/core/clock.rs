//! # Wall-clock milliseconds driven by the tokio timer.
//!
//! Task schedules are stored as epoch milliseconds (they are persisted and must
//! survive restarts), while the scheduler and the timeout race sleep on
//! [`tokio::time`]. [`Clock`] reads the wall clock once and advances it with
//! [`tokio::time::Instant`], so a paused test runtime moves both together.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Epoch-millisecond clock anchored to a tokio instant.
#[derive(Clone, Copy, Debug)]
pub struct Clock {
    anchor_ms: u64,
    anchor: Instant,
}

impl Clock {
    /// Anchors the clock at the current wall-clock time.
    pub fn new() -> Self {
        let anchor_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::starting_at(anchor_ms)
    }

    /// Anchors the clock at an explicit epoch time.
    pub fn starting_at(anchor_ms: u64) -> Self {
        Self {
            anchor_ms,
            anchor: Instant::now(),
        }
    }

    /// Current time in epoch milliseconds.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.anchor_ms
            .saturating_add(self.anchor.elapsed().as_millis() as u64)
    }

    /// `now + d` in epoch milliseconds.
    #[inline]
    pub fn after(&self, d: Duration) -> u64 {
        self.now_ms().saturating_add(d.as_millis() as u64)
    }

    /// Time left until `at_ms` (zero if already past).
    #[inline]
    pub fn until(&self, at_ms: u64) -> Duration {
        Duration::from_millis(at_ms.saturating_sub(self.now_ms()))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
