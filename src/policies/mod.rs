//! Backoff and jitter policies.
//!
//! These knobs control **how long** the recovery engine waits between
//! attempts to restart the host service.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid lockstep retries
//!
//! ## Quick wiring
//! ```text
//! RecoveryConfig { initial_recovery_delay, max_recovery_delay, backoff_factor, jitter, .. }
//!      └─► RecoveryConfig::backoff() ─► BackoffPolicy
//!           └─► core::recovery::RecoveryEngine uses next(attempt - 1)
//!               for the delay reported with each attempt and for scheduling retries
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=1s, factor=2.0, max=60s, jitter=None.
//! - `JitterPolicy::None` by default; consider `Equal` when many processes share a host.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
