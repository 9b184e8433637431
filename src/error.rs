//! Error types used by the taskwarden runtime, registry and recovery engine.
//!
//! This module defines one error enum per concern:
//!
//! - [`TaskError`]: the outcome of a single action invocation.
//! - [`RegistryError`]: task CRUD and execution failures.
//! - [`PersistenceError`]: durable store read/write failures (never fatal).
//! - [`RecoveryError`]: recovery attempts rejected or failed.
//! - [`ServiceError`]: host service lifecycle failures.
//! - [`RuntimeError`]: failures of the runtime itself (shutdown).
//!
//! All types provide helper methods (`as_label`, `as_message`) for logging.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the taskwarden runtime.
///
/// These represent failures in the orchestration system itself,
/// such as a shutdown sequence exceeding its grace period.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some actions were still in flight.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Ids of tasks whose actions did not settle in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use taskwarden::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::GraceExceeded { grace, stuck } => {
                format!("grace exceeded after {grace:?}; stuck tasks={stuck:?}")
            }
        }
    }
}

/// # Errors produced by a single action invocation.
///
/// `Timeout` is produced by the executor race, `Fail` by the action itself.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The action did not settle before the task timeout elapsed.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// The action returned an error (or panicked).
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The action observed its cancellation token and gave up.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use taskwarden::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            TaskError::Fail { error } => format!("error: {error}"),
            TaskError::Canceled => "context cancelled".to_string(),
        }
    }

    /// Returns `true` if the executor race was lost to the timer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }
}

/// # Errors produced by registry operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The task cannot be executed or registered as given
    /// (empty id, or a restored descriptor with no action attached).
    #[error("invalid task: {reason}")]
    InvalidTask {
        /// Why the task was rejected.
        reason: String,
    },

    /// No task with this id is registered.
    #[error("task not found: {id}")]
    TaskNotFound {
        /// The requested task id.
        id: String,
    },

    /// The action ran and failed (error or timeout).
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::InvalidTask { .. } => "invalid_task",
            RegistryError::TaskNotFound { .. } => "task_not_found",
            RegistryError::Task(e) => e.as_label(),
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RegistryError::InvalidTask { reason } => format!("invalid task: {reason}"),
            RegistryError::TaskNotFound { id } => format!("task not found: {id}"),
            RegistryError::Task(e) => e.as_message(),
        }
    }

    /// Returns the underlying action error, if the action actually ran.
    pub fn as_task_error(&self) -> Option<&TaskError> {
        match self {
            RegistryError::Task(e) => Some(e),
            _ => None,
        }
    }
}

/// # Durable store failures.
///
/// Persistence is best effort: these errors are logged and published, and
/// in-memory state stays authoritative.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The store backend failed to read or write a key.
    #[error("store failure on {key}: {error}")]
    Store {
        /// Storage key.
        key: String,
        /// Backend error message.
        error: String,
    },

    /// The stored value could not be encoded or decoded.
    #[error("codec failure on {key}: {source}")]
    Codec {
        /// Storage key.
        key: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl PersistenceError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PersistenceError::Store { .. } => "persistence_store",
            PersistenceError::Codec { .. } => "persistence_codec",
        }
    }
}

/// # Recovery attempts that did not restart the service.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// Attempted inside the throttle window of the previous attempt.
    #[error("recovery throttled; next attempt allowed in {retry_in:?}")]
    Throttled {
        /// Time left until the throttle window closes.
        retry_in: Duration,
    },

    /// The attempt ceiling was reached; only an explicit reset re-enables recovery.
    #[error("recovery exhausted after {attempts} attempts")]
    Exhausted {
        /// Attempts made so far.
        attempts: u32,
    },

    /// Registry believes the service is running but the host disagrees.
    #[error("service state inconsistency: registry={expected} host={reported}")]
    ServiceStateInconsistency {
        /// Registry-side running flag.
        expected: bool,
        /// Host-reported running flag.
        reported: bool,
    },

    /// The restart call itself failed.
    #[error("restart failed: {error}")]
    Host {
        /// Host error message.
        error: String,
    },
}

impl RecoveryError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RecoveryError::Throttled { .. } => "recovery_throttled",
            RecoveryError::Exhausted { .. } => "recovery_exhausted",
            RecoveryError::ServiceStateInconsistency { .. } => "service_state_inconsistency",
            RecoveryError::Host { .. } => "recovery_host_failed",
        }
    }
}

/// # Host service lifecycle failures.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The start/update configuration is not usable.
    #[error("invalid service configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with it.
        reason: String,
    },

    /// The execution host rejected the call.
    #[error("host error: {error}")]
    Host {
        /// Host error message.
        error: String,
    },
}

impl ServiceError {
    /// Shorthand for [`ServiceError::Host`].
    pub fn host(error: impl Into<String>) -> Self {
        ServiceError::Host {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::InvalidConfig { .. } => "service_invalid_config",
            ServiceError::Host { .. } => "service_host_error",
        }
    }
}
