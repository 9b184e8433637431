//! External collaborators at their interface boundary.
//!
//! The core never talks to an operating system service directly. It consumes:
//! - [`ExecutionHost`]: starts/stops the real background execution context and
//!   reports whether it is running;
//! - [`VisibilitySource`]: foreground/background transitions;
//! - [`HostEvent`]: unsolicited notifications from the host (service killed,
//!   restarted on its own, host-side recovery failed).
//!
//! [`ServiceConfig`] is the opaque start configuration the host needs to
//! (re)start the context; [`ServiceState`] is the registry's belief about it.

mod service;
mod visibility;

use async_trait::async_trait;

use crate::error::ServiceError;

pub use service::{ServiceConfig, ServiceState};
pub use visibility::{Visibility, VisibilitySource};

/// Native execution host contract.
///
/// Implementations wrap whatever keeps the process alive in the background.
/// All calls may suspend.
#[async_trait]
pub trait ExecutionHost: Send + Sync + 'static {
    /// Starts the background execution context.
    async fn start_service(&self, config: &ServiceConfig) -> Result<(), ServiceError>;

    /// Updates the running context (e.g. its notification) in place.
    async fn update_service(&self, config: &ServiceConfig) -> Result<(), ServiceError>;

    /// Stops the context started with `config.id`.
    async fn stop_service(&self) -> Result<(), ServiceError>;

    /// Stops every context this host owns.
    async fn stop_all_services(&self) -> Result<(), ServiceError> {
        self.stop_service().await
    }

    /// Reports whether the context is actually running right now.
    async fn is_service_running(&self) -> Result<bool, ServiceError>;

    /// Tears the context down (if needed) and starts it again with `config`.
    async fn restart_service(&self, config: &ServiceConfig) -> Result<(), ServiceError>;

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Notifications pushed by the host outside any request.
#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    /// The host killed the execution context.
    ServiceKilled,
    /// The host restarted the execution context by itself.
    ServiceRestarted {
        /// Config the context now runs with, if the host reports one.
        config: Option<ServiceConfig>,
    },
    /// Host-side recovery gave up.
    RecoveryFailed {
        /// Host-provided reason.
        reason: String,
    },
}
