//! # Task abstractions, policies and descriptors.
//!
//! A task is split in two halves joined by id while the process lives:
//! - [`TaskDescriptor`]: serializable policy and bookkeeping (persisted);
//! - [`TaskHandle`]: the action and its callbacks (process-local, never persisted).
//!
//! Supporting types:
//! - [`Action`] - trait for async, cooperatively cancelable actions
//! - [`ActionFn`] - closure-backed action
//! - [`ActionRef`] - shared reference to an action (`Arc<dyn Action>`)
//! - [`TaskOptions`] - caller-facing policy used by add/update
//! - [`Priority`] - dispatch tier
//! - [`TaskInfo`] - read-only snapshot returned by registry queries

mod action;
mod action_fn;
mod descriptor;
mod handle;
pub(crate) mod options;

pub use action::{Action, ActionRef, ActionResult, BoxActionFuture};
pub use action_fn::ActionFn;
pub use descriptor::{TaskDescriptor, TaskInfo};
pub use handle::{ErrorCallback, SuccessCallback, TaskHandle};
pub use options::{MIN_DELAY, Priority, TaskOptions};
