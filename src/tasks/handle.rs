//! # Process-local half of a task.

use std::fmt;
use std::sync::Arc;

use crate::error::TaskError;
use crate::tasks::action::ActionRef;

/// Called with the action's result after a successful run.
pub type SuccessCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync + 'static>;

/// Called with the error after a failed or timed-out run.
pub type ErrorCallback = Arc<dyn Fn(&TaskError) + Send + Sync + 'static>;

/// Action plus callbacks. Never serialized; lost on process restart.
#[derive(Clone)]
pub struct TaskHandle {
    /// Code to run.
    pub action: ActionRef,
    /// Success callback.
    pub on_success: Option<SuccessCallback>,
    /// Error callback.
    pub on_error: Option<ErrorCallback>,
}

impl TaskHandle {
    /// Handle with no callbacks.
    pub fn new(action: ActionRef) -> Self {
        Self {
            action,
            on_success: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}
