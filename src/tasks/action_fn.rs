//! # Function-backed action (`ActionFn`)
//!
//! [`ActionFn`] wraps a closure `F: Fn(CancellationToken) -> Fut`, producing a fresh
//! future per spawn. This avoids shared mutable state and needs no `Mutex`.
//!
//! ## Concurrency semantics
//! - Every [`Action::spawn`] call creates a **new** future owning its own state.
//! - Nothing is mutated behind the caller's back between runs; if state must be
//!   shared across runs, capture an `Arc<...>` explicitly.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use taskwarden::{ActionFn, ActionRef, TaskError};
//!
//! let a: ActionRef = ActionFn::arc(|ctx: CancellationToken| async move {
//!     if ctx.is_cancelled() {
//!         return Err(TaskError::Canceled);
//!     }
//!     Ok(serde_json::json!({ "synced": 3 }))
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::tasks::action::{Action, ActionResult, BoxActionFuture};

/// Function-backed action implementation.
///
/// Wraps a closure that *creates* a new future per spawn.
pub struct ActionFn<F> {
    f: F,
}

impl<F> ActionFn<F> {
    /// Creates a new function-backed action.
    ///
    /// Prefer [`ActionFn::arc`] when you immediately need an [`ActionRef`](crate::ActionRef).
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the action and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F> fmt::Debug for ActionFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionFn").finish_non_exhaustive()
    }
}

impl<F, Fut> Action for ActionFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    fn spawn(&self, ctx: CancellationToken) -> BoxActionFuture {
        Box::pin((self.f)(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ActionRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn each_spawn_is_a_fresh_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let action: ActionRef = ActionFn::arc(move |_ctx| {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(serde_json::json!(n)) }
        });

        let first = action.spawn(CancellationToken::new()).await;
        let second = action.spawn(CancellationToken::new()).await;
        assert_eq!(first, Ok(serde_json::json!(1)));
        assert_eq!(second, Ok(serde_json::json!(2)));
    }
}
