//! # Runtime configuration.
//!
//! Three plain structs, each with a [`Default`] matching the behavior hosts
//! expect out of the box:
//! - [`Config`]: runtime-wide settings (event bus, shutdown grace, task defaults);
//! - [`SchedulerConfig`]: polling interval bounds and concurrency cap;
//! - [`RecoveryConfig`]: attempt ceiling, backoff and throttle for service recovery.
//!
//! All three deserialize from JSON with missing fields filled from the
//! defaults. Durations are written as integer milliseconds.
//!
//! ## Sentinel values
//! - `Config::timeout = 0ms` → tasks without an explicit timeout never time out
//! - `SchedulerConfig::max_concurrent_tasks = 0` → treated as 1
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use taskwarden::{Config, RecoveryConfig, SchedulerConfig};
//!
//! let sched: SchedulerConfig = serde_json::from_str(r#"{ "min_interval": 250 }"#).unwrap();
//! assert_eq!(sched.min_interval, Duration::from_millis(250));
//! assert_eq!(sched.max_interval, Duration::from_secs(5));
//!
//! let mut rec = RecoveryConfig::default();
//! rec.recovery_throttle_time = Duration::ZERO;
//! assert_eq!(rec.backoff().next(1), Duration::from_secs(2));
//!
//! assert_eq!(Config::default().default_timeout(), Some(Duration::from_secs(15)));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policies::{BackoffPolicy, JitterPolicy};

/// Shortest scheduler poll or health check period.
pub const MIN_LOOP_PERIOD: Duration = Duration::from_millis(10);

/// How `Registry::update_task` treats an unknown id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Unknown id → `RegistryError::TaskNotFound`.
    #[default]
    Strict,
    /// Unknown id → the task is created with the given id.
    Upsert,
}

/// Runtime-wide configuration.
///
/// ## Field semantics
/// - `grace`: Maximum wait for in-flight actions during shutdown
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `timeout`: Default per-task timeout (`0` = no timeout)
/// - `update_mode`: Behavior of `update_task` on unknown ids
/// - `auto_restart`: Initial auto-restart flag when none is persisted
/// - `enable_recovery`: Whether the runtime starts the recovery monitor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum time to wait for in-flight actions on shutdown.
    #[serde(with = "duration_ms")]
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Default task timeout, used when [`TaskOptions::timeout`](crate::TaskOptions) is unset.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// `update_task` behavior for unknown ids.
    pub update_mode: UpdateMode,

    /// Restart the service from its last config during `Runtime::initialize`
    /// (used until the flag is persisted by `set_auto_restart`).
    pub auto_restart: bool,

    /// Start the recovery monitor together with the service.
    pub enable_recovery: bool,
}

impl Config {
    /// Returns the default per-task timeout as an `Option`.
    ///
    /// - `None` → no timeout
    /// - `Some(d)` → race each run against `d`
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.timeout == Duration::ZERO {
            None
        } else {
            Some(self.timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - `timeout = 15s`
    /// - `update_mode = Strict`
    /// - `auto_restart = false`
    /// - `enable_recovery = true`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            timeout: Duration::from_secs(15),
            update_mode: UpdateMode::Strict,
            auto_restart: false,
            enable_recovery: true,
        }
    }
}

/// Adaptive scheduler configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval while there is work (and right after a foreground transition).
    #[serde(with = "duration_ms")]
    pub min_interval: Duration,

    /// Upper bound for the interval, including the background doubling.
    #[serde(with = "duration_ms")]
    pub max_interval: Duration,

    /// Growth per idle adjustment; background transitions add twice this.
    #[serde(with = "duration_ms")]
    pub interval_step: Duration,

    /// Batch size: at most this many actions are in flight at once.
    pub max_concurrent_tasks: usize,

    /// Grow the interval while idle and react to visibility transitions.
    pub adaptive_scheduling: bool,

    /// Idle time after which the interval starts growing.
    #[serde(with = "duration_ms")]
    pub idle_threshold: Duration,

    /// Skip cycles while the registry reports the service as not running.
    pub require_service_running: bool,
}

impl SchedulerConfig {
    /// Batch size, at least 1.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.max_concurrent_tasks.max(1)
    }

    /// `min_interval`, at least [`MIN_LOOP_PERIOD`].
    #[inline]
    pub fn min_interval_clamped(&self) -> Duration {
        self.min_interval.max(MIN_LOOP_PERIOD)
    }

    /// `min(d, max_interval)`, never below [`SchedulerConfig::min_interval_clamped`].
    #[inline]
    pub fn cap(&self, d: Duration) -> Duration {
        d.min(self.max_interval).max(self.min_interval_clamped())
    }
}

impl Default for SchedulerConfig {
    /// Default configuration:
    ///
    /// - `min_interval = 500ms`, `max_interval = 5s`, `interval_step = 500ms`
    /// - `max_concurrent_tasks = 3`
    /// - `adaptive_scheduling = true`
    /// - `idle_threshold = 10s`
    /// - `require_service_running = true`
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            interval_step: Duration::from_millis(500),
            max_concurrent_tasks: 3,
            adaptive_scheduling: true,
            idle_threshold: Duration::from_secs(10),
            require_service_running: true,
        }
    }
}

/// Recovery engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts allowed before the engine becomes exhausted.
    pub max_recovery_attempts: u32,

    /// Backoff delay of the first attempt (and after every reset).
    #[serde(with = "duration_ms")]
    pub initial_recovery_delay: Duration,

    /// Backoff cap.
    #[serde(with = "duration_ms")]
    pub max_recovery_delay: Duration,

    /// Grow the delay by `backoff_factor` per attempt; constant otherwise.
    pub use_exponential_backoff: bool,

    /// Growth factor.
    pub backoff_factor: f64,

    /// Jitter applied to retry delays.
    pub jitter: JitterPolicy,

    /// Minimum spacing between two attempts.
    #[serde(with = "duration_ms")]
    pub recovery_throttle_time: Duration,

    /// Check the service on every foreground transition.
    pub recover_on_foreground: bool,

    /// Run the periodic health check.
    pub enable_health_check: bool,

    /// Health check period.
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,

    /// After a failed attempt, schedule the next one once its backoff delay
    /// (and the throttle window) has elapsed.
    pub retry_failed_recoveries: bool,
}

impl RecoveryConfig {
    /// `health_check_interval`, at least [`MIN_LOOP_PERIOD`].
    #[inline]
    pub fn health_check_interval_clamped(&self) -> Duration {
        self.health_check_interval.max(MIN_LOOP_PERIOD)
    }

    /// Backoff policy derived from this config.
    ///
    /// Attempt `k` (1-based) waits `backoff().next(k - 1)`.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            first: self.initial_recovery_delay,
            max: self.max_recovery_delay,
            factor: if self.use_exponential_backoff {
                self.backoff_factor
            } else {
                1.0
            },
            jitter: self.jitter,
        }
    }
}

impl Default for RecoveryConfig {
    /// Default configuration:
    ///
    /// - `max_recovery_attempts = 5`
    /// - `initial_recovery_delay = 1s`, `max_recovery_delay = 60s`, factor `2.0`, no jitter
    /// - `recovery_throttle_time = 30s`
    /// - `recover_on_foreground = true`
    /// - health check every `30s`
    /// - `retry_failed_recoveries = true`
    fn default() -> Self {
        Self {
            max_recovery_attempts: 5,
            initial_recovery_delay: Duration::from_secs(1),
            max_recovery_delay: Duration::from_secs(60),
            use_exponential_backoff: true,
            backoff_factor: 2.0,
            jitter: JitterPolicy::None,
            recovery_throttle_time: Duration::from_secs(30),
            recover_on_foreground: true,
            enable_health_check: true,
            health_check_interval: Duration::from_secs(30),
            retry_failed_recoveries: true,
        }
    }
}

/// `Duration` as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_json_gives_defaults() {
        let cfg: RecoveryConfig = serde_json::from_str("{}").expect("decode");
        assert_eq!(cfg, RecoveryConfig::default());
    }

    #[test]
    fn durations_round_trip_as_millis() {
        let cfg = SchedulerConfig::default();
        let v = serde_json::to_value(&cfg).expect("encode");
        assert_eq!(v["min_interval"], serde_json::json!(500));
        assert_eq!(v["idle_threshold"], serde_json::json!(10_000));
    }

    #[test]
    fn constant_backoff_when_exponential_disabled() {
        let cfg = RecoveryConfig {
            use_exponential_backoff: false,
            ..RecoveryConfig::default()
        };
        let b = cfg.backoff();
        assert_eq!(b.next(0), Duration::from_secs(1));
        assert_eq!(b.next(4), Duration::from_secs(1));
    }

    #[test]
    fn zero_timeout_means_none() {
        let cfg = Config {
            timeout: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.default_timeout(), None);
    }

    #[test]
    fn zero_periods_are_floored() {
        let sched = SchedulerConfig {
            min_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            ..SchedulerConfig::default()
        };
        assert_eq!(sched.min_interval_clamped(), MIN_LOOP_PERIOD);
        assert_eq!(sched.cap(Duration::ZERO), MIN_LOOP_PERIOD);

        let rec = RecoveryConfig {
            health_check_interval: Duration::ZERO,
            ..RecoveryConfig::default()
        };
        assert_eq!(rec.health_check_interval_clamped(), MIN_LOOP_PERIOD);
        assert_eq!(
            RecoveryConfig::default().health_check_interval_clamped(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn batch_size_never_zero() {
        let cfg = SchedulerConfig {
            max_concurrent_tasks: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(cfg.batch_size(), 1);
    }
}
