//! # Jitter for recovery retry delays.
//!
//! Several processes restarting the same host service after a shared outage
//! would otherwise retry on the same backoff curve at the same instants.
//! [`JitterPolicy`] spreads them out. The default is [`JitterPolicy::None`],
//! which keeps recovery delays at exactly 1s, 2s, 4s, ...

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How a backoff delay is randomized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterPolicy {
    /// Exact backoff delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay / 2, delay]`.
    Equal,
    /// Uniform in `[first, 3 × previous]`, capped at the backoff maximum.
    /// Needs the previous delay, see [`JitterPolicy::apply_decorrelated`].
    Decorrelated,
}

impl JitterPolicy {
    /// Randomizes `delay`. `Decorrelated` has no context here and returns
    /// `delay` unchanged.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = millis(delay);
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full => uniform(0, ms),
            JitterPolicy::Equal => uniform(ms / 2, ms),
        }
    }

    /// Decorrelated jitter from the previous delay. Other policies fall back
    /// to [`JitterPolicy::apply`] on `prev`.
    pub fn apply_decorrelated(&self, first: Duration, prev: Duration, max: Duration) -> Duration {
        if *self != JitterPolicy::Decorrelated {
            return self.apply(prev);
        }
        let lo = millis(first);
        let hi = millis(prev).saturating_mul(3).min(millis(max)).max(lo);
        uniform(lo, hi)
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Uniform duration in `[lo, hi]` milliseconds.
fn uniform(lo: u64, hi: u64) -> Duration {
    if lo >= hi {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn equal_keeps_at_least_half() {
        let d = Duration::from_secs(4);
        for _ in 0..50 {
            let j = JitterPolicy::Equal.apply(d);
            assert!(j >= Duration::from_secs(2) && j <= d);
        }
    }

    #[test]
    fn decorrelated_stays_within_first_and_triple_previous() {
        let first = Duration::from_millis(1000);
        let max = Duration::from_secs(60);
        for _ in 0..50 {
            let d = JitterPolicy::Decorrelated.apply_decorrelated(first, Duration::from_secs(8), max);
            assert!(d >= first && d <= Duration::from_secs(24));
        }
    }

    #[test]
    fn parses_lowercase_names() {
        let j: JitterPolicy = serde_json::from_str("\"equal\"").expect("decode");
        assert_eq!(j, JitterPolicy::Equal);
    }
}
