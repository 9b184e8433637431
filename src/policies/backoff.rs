//! # Backoff policy for service recovery attempts.
//!
//! [`BackoffPolicy`] controls how the wait before the next recovery attempt
//! grows after repeated failures. It is parameterized by:
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for attempt index `n` (0-based) is `first × factor^n`, clamped to
//! `max`, then jitter is applied. The base delay is derived purely from the
//! attempt index, so jitter output never feeds back into later delays, and a
//! counter reset brings the delay straight back to `first`.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use taskwarden::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(60),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! // 1s → 2s → 4s → … → capped at 60s
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(1), Duration::from_secs(2));
//! assert_eq!(backoff.next(2), Duration::from_secs(4));
//! assert_eq!(backoff.next(6), Duration::from_secs(60));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Delay curve of the recovery engine.
///
/// Built from [`RecoveryConfig::backoff`](crate::RecoveryConfig::backoff);
/// attempt `k` (1-based) waits `next(k - 1)`.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after a reset.
    pub first: Duration,
    /// Cap.
    pub max: Duration,
    /// Growth per attempt; `1.0` keeps the delay constant.
    pub factor: f64,
    /// Randomization of the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// 1s doubling up to 60s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the 0-based attempt index `n`.
    ///
    /// Derived from `n` alone, never from a previous (jittered) delay.
    pub fn next(&self, n: u32) -> Duration {
        let base = self.base(n);
        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.first.min(self.max), base, self.max)
            }
            other => other.apply(base),
        }
    }

    /// `first × factor^n`, clamped to `max`. Overflow and NaN clamp to `max`.
    fn base(&self, n: u32) -> Duration {
        let exp = i32::try_from(n).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if secs.is_finite() && (0.0..=self.max.as_secs_f64()).contains(&secs) {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recovery() -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(1000),
            max: Duration::from_millis(60_000),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn doubles_until_capped() {
        let policy = recovery();
        let delays: Vec<u128> = (0..8).map(|n| policy.next(n).as_millis()).collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16_000, 32_000, 60_000, 60_000]
        );
    }

    #[test]
    fn default_matches_recovery_curve() {
        let d = BackoffPolicy::default();
        assert_eq!(d.next(0), Duration::from_secs(1));
        assert_eq!(d.next(3), Duration::from_secs(8));
    }

    #[test]
    fn constant_factor() {
        let policy = BackoffPolicy {
            factor: 1.0,
            ..recovery()
        };
        for attempt in 0..10 {
            assert_eq!(
                policy.next(attempt),
                Duration::from_millis(1000),
                "attempt {} should be constant at 1000ms",
                attempt
            );
        }
    }

    #[test]
    fn first_exceeds_max() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(90),
            ..recovery()
        };
        assert_eq!(policy.next(0), Duration::from_secs(60));
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..recovery()
        };
        for attempt in 0..12 {
            let base_ms = (1000.0 * 2.0f64.powi(attempt as i32)).min(60_000.0);
            let delay = policy.next(attempt);
            assert!(delay >= Duration::from_millis((base_ms / 2.0) as u64));
            assert!(delay <= Duration::from_millis(base_ms as u64));
        }
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..recovery()
        };
        for attempt in 0..12 {
            let base_ms = (1000.0 * 2.0f64.powi(attempt as i32)).min(60_000.0);
            assert!(policy.next(attempt) <= Duration::from_millis(base_ms as u64));
        }
    }

    #[test]
    fn non_finite_overflow_clamps_to_max() {
        assert_eq!(recovery().next(u32::MAX), Duration::from_secs(60));
    }
}
