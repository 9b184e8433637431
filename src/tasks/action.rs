//! # Action abstraction.
//!
//! The [`Action`] trait is the executable half of a task: a zero-argument async
//! unit that returns a JSON value or fails. The common handle type is
//! [`ActionRef`], an `Arc<dyn Action>` shared between the registry and the
//! executor.
//!
//! An action receives a [`CancellationToken`]. The token is cancelled when the
//! executor's timeout race is lost or the runtime shuts down; the action is
//! **not** aborted, so long-running actions should check the token and return.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Output of one action invocation.
pub type ActionResult = Result<serde_json::Value, TaskError>;

/// Boxed future returned by [`Action::spawn`].
pub type BoxActionFuture = Pin<Box<dyn Future<Output = ActionResult> + Send + 'static>>;

/// Shared handle to an action object.
pub type ActionRef = Arc<dyn Action>;

/// # Asynchronous, cooperatively cancelable action.
///
/// Each [`spawn`](Action::spawn) creates a **fresh** future that owns its state,
/// so the executor can move it onto its own tokio task and let it outlive a
/// lost timeout race.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use taskwarden::{Action, ActionResult, BoxActionFuture};
///
/// struct Ping;
///
/// impl Action for Ping {
///     fn spawn(&self, ctx: CancellationToken) -> BoxActionFuture {
///         Box::pin(async move {
///             if ctx.is_cancelled() {
///                 return Ok(serde_json::Value::Null);
///             }
///             Ok(serde_json::json!("pong"))
///         })
///     }
/// }
/// ```
pub trait Action: Send + Sync + 'static {
    /// Creates a new future that performs one invocation.
    fn spawn(&self, ctx: CancellationToken) -> BoxActionFuture;
}
