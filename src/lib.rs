//! # taskwarden
//!
//! **Taskwarden** keeps background jobs scheduled, bounded and recovered
//! inside a long-running host process.
//!
//! It registers units of async work ("tasks") with timing and priority
//! policy, runs them through an adaptive polling scheduler under a
//! concurrency cap, persists their metadata so they survive restarts, and
//! restarts the host's background execution context when it dies.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   add_task / update_task / pause / resume / remove
//!                      │
//!                      ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Registry                                                         │
//! │  - id → descriptor (persisted) + handle (action, callbacks)      │
//! │  - execute_task_with_timeout: run_once race, bookkeeping, settle │
//! │  - service state (running flag + start config)                   │
//! └───────▲───────────────────────────▲──────────────────────┬───────┘
//!         │ due_tasks / execute       │ set_service_running  │ persist
//! ┌───────┴──────────┐       ┌────────┴─────────┐     ┌──────▼───────┐
//! │ Scheduler        │◄──────┤ RecoveryEngine   │     │ DurableStore │
//! │ - adaptive poll  │ start │ - health check   │     └──────────────┘
//! │ - batch cap      │ force │ - throttle       │
//! │ - visibility     │       │ - attempt ceiling│───► ExecutionHost
//! └───────▲──────────┘       │ - backoff        │     (restart_service)
//!         │                  └────────▲─────────┘
//!         └──── VisibilitySource ─────┘
//!
//! Every component publishes Events on the Bus:
//!   Bus ──► sync listeners (add_listener)
//!       └─► Runtime fan-out ──► SubscriberSet ──► worker per subscriber
//! ```
//!
//! ### Execution of one task
//! ```text
//! execute_task_with_timeout(id)
//!   ├─► TaskStarting{ task, attempt, timeout_ms }
//!   ├─► run_once: spawned action  vs  timer (disarmed by pause/remove)
//!   │       ├─ action settles → Ok(value) / Err(Fail)
//!   │       └─ timer fires    → token cancelled, TimeoutHit, Err(Timeout)
//!   ├─► success: execution_count += 1 │ failure: failure_count += 1
//!   ├─► looping → next = completion + loop_delay │ one-shot → removed
//!   ├─► persist descriptors
//!   └─► on_success / on_error, TaskExecuted / TaskError
//! ```
//!
//! ## Features
//! | Area              | Description                                           | Key types / traits                          |
//! |-------------------|-------------------------------------------------------|---------------------------------------------|
//! | **Tasks**         | Async actions with delay, loop, priority and timeout. | [`Action`], [`ActionFn`], [`TaskOptions`]   |
//! | **Registry**      | CRUD, execution with timeout, persistence, restore.   | [`Registry`], [`TaskInfo`]                  |
//! | **Scheduling**    | Adaptive interval, batch cap, visibility reaction.    | [`Scheduler`], [`SchedulerConfig`]          |
//! | **Recovery**      | Health check, throttle, attempt ceiling, backoff.     | [`RecoveryEngine`], [`BackoffPolicy`]       |
//! | **Lifecycle**     | Service start/stop/update, auto-restart, shutdown.    | [`Runtime`], [`RuntimeBuilder`]             |
//! | **Host boundary** | Native service, visibility, storage.                  | [`ExecutionHost`], [`VisibilitySource`], [`DurableStore`] |
//! | **Events**        | Typed events, sync listeners, async subscribers.      | [`Event`], [`Bus`], [`Subscribe`], [`LogWriter`] |
//! | **Errors**        | One typed error per concern.                          | [`RegistryError`], [`RecoveryError`], ...   |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use taskwarden::{
//!     ActionFn, ActionRef, Config, LogWriter, Priority, RuntimeBuilder, ServiceConfig,
//!     Subscribe, TaskOptions,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::default())];
//!     let runtime = RuntimeBuilder::new(Config::default())
//!         .with_subscribers(subs)
//!         .build();
//!     runtime.initialize().await;
//!
//!     let sync: ActionRef = ActionFn::arc(|ctx: CancellationToken| async move {
//!         if ctx.is_cancelled() {
//!             return Err(taskwarden::TaskError::Canceled);
//!         }
//!         Ok(serde_json::json!({ "synced": 3 }))
//!     });
//!     runtime
//!         .add_task(
//!             sync,
//!             TaskOptions::new()
//!                 .id("sync")
//!                 .looping(Duration::from_secs(30))
//!                 .priority(Priority::High),
//!         )
//!         .await?;
//!
//!     runtime.start_service(ServiceConfig::new(1).with_title("Syncing")).await?;
//!     let value = runtime.execute_task("sync").await?;
//!     assert_eq!(value["synced"], 3);
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod host;
mod policies;
mod store;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use config::{Config, MIN_LOOP_PERIOD, RecoveryConfig, SchedulerConfig, UpdateMode};
pub use crate::core::{
    Clock, RecoveryEngine, RecoveryOutcome, RecoveryPhase, RecoveryStatus, Registry, Runtime,
    RuntimeBuilder, RuntimeStatus, Scheduler, SchedulerStatus, ServiceSnapshot, run_once,
    wait_for_shutdown_signal,
};
pub use error::{
    PersistenceError, RecoveryError, RegistryError, RuntimeError, ServiceError, TaskError,
};
pub use events::{Bus, Event, EventKind, Listener};
pub use host::{ExecutionHost, HostEvent, ServiceConfig, ServiceState, Visibility, VisibilitySource};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use store::{DurableStore, JsonFileStore, MemoryStore, keys};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use tasks::{
    Action, ActionFn, ActionRef, ActionResult, BoxActionFuture, ErrorCallback, MIN_DELAY,
    Priority, SuccessCallback, TaskDescriptor, TaskHandle, TaskInfo, TaskOptions,
};
