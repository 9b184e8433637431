use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, RecoveryConfig, SchedulerConfig},
    core::clock::Clock,
    events::Bus,
    host::{ExecutionHost, VisibilitySource},
    store::{DurableStore, MemoryStore},
    subscribers::{Subscribe, SubscriberSet},
};

use super::{recovery::RecoveryEngine, registry::Registry, runtime::Runtime, scheduler::Scheduler};

/// Builder for a [`Runtime`] and its collaborators.
///
/// Everything is optional: without a store the runtime keeps state in a
/// [`MemoryStore`], without a host the recovery engine restarts through the
/// registry and scheduler only.
pub struct RuntimeBuilder {
    cfg: Config,
    scheduler_cfg: SchedulerConfig,
    recovery_cfg: RecoveryConfig,
    store: Option<Arc<dyn DurableStore>>,
    host: Option<Arc<dyn ExecutionHost>>,
    visibility: Option<VisibilitySource>,
    clock: Option<Clock>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RuntimeBuilder {
    /// Creates a builder with the given runtime configuration and default
    /// scheduler/recovery configurations.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            scheduler_cfg: SchedulerConfig::default(),
            recovery_cfg: RecoveryConfig::default(),
            store: None,
            host: None,
            visibility: None,
            clock: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the scheduler configuration.
    pub fn with_scheduler_config(mut self, cfg: SchedulerConfig) -> Self {
        self.scheduler_cfg = cfg;
        self
    }

    /// Sets the recovery configuration.
    pub fn with_recovery_config(mut self, cfg: RecoveryConfig) -> Self {
        self.recovery_cfg = cfg;
        self
    }

    /// Sets the durable store for task metadata and service state.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the native execution host.
    pub fn with_host(mut self, host: Arc<dyn ExecutionHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Shares a visibility source with the host (defaults to a private
    /// foreground source, driven through [`Runtime::set_visibility`]).
    pub fn with_visibility(mut self, visibility: VisibilitySource) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// Overrides the clock (tests pin the epoch with [`Clock::starting_at`]).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets event subscribers.
    ///
    /// Each one gets a dedicated worker with a bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the runtime. Must be called inside a Tokio runtime (subscriber
    /// workers are spawned here).
    ///
    /// Nothing is restored or started yet; call [`Runtime::initialize`] next.
    pub fn build(self) -> Arc<Runtime> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let runtime_token = CancellationToken::new();

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn DurableStore>);
        let clock = self.clock.unwrap_or_default();
        let visibility = self.visibility.unwrap_or_default();

        let registry = Registry::new(
            self.cfg.clone(),
            bus,
            store,
            clock,
            runtime_token.clone(),
        );
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&registry),
            visibility.clone(),
            self.scheduler_cfg,
        ));
        let recovery = RecoveryEngine::new(
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            self.host.clone(),
            visibility.clone(),
            self.recovery_cfg,
        );

        Arc::new(Runtime::new_internal(
            self.cfg,
            registry,
            scheduler,
            recovery,
            self.host,
            visibility,
            runtime_token,
            subs,
        ))
    }
}
