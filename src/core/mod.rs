//! Runtime core: registry, executor, scheduler, recovery and lifecycle.
//!
//! Internal modules:
//! - [`clock`]: epoch milliseconds anchored to Tokio's (pausable) clock;
//! - [`runner`]: one action invocation raced against its timeout;
//! - [`registry`]: task records, bookkeeping, persistence, service state;
//! - [`scheduler`]: adaptive polling loop with a concurrency cap;
//! - [`recovery`]: throttled, backoff-governed service restarts;
//! - [`runtime`]: service lifecycle facade, fan-out and graceful shutdown;
//! - [`builder`]: dependency injection for [`Runtime`];
//! - [`shutdown`]: cross-platform termination signals.

mod builder;
mod clock;
mod recovery;
mod registry;
mod runner;
mod runtime;
mod scheduler;
mod shutdown;

pub use builder::RuntimeBuilder;
pub use clock::Clock;
pub use recovery::{RecoveryEngine, RecoveryOutcome, RecoveryPhase, RecoveryStatus, ServiceSnapshot};
pub use registry::Registry;
pub use runner::run_once;
pub use runtime::{Runtime, RuntimeStatus};
pub use scheduler::{Scheduler, SchedulerStatus};
pub use shutdown::wait_for_shutdown_signal;
