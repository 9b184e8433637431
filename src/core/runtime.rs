//! # Runtime: the service lifecycle facade.
//!
//! [`Runtime`] wires the [`Registry`], the [`Scheduler`], the
//! [`RecoveryEngine`] and an optional [`ExecutionHost`] together, owns the
//! subscriber fan-out, and drives graceful shutdown.
//!
//! ## Architecture
//! ```text
//! RuntimeBuilder::build()
//!   ├─► Bus ──► fan-out task ──► SubscriberSet ──► subscriber workers
//!   ├─► Registry (store, clock, runtime token)
//!   ├─► Scheduler (visibility)
//!   └─► RecoveryEngine (host, visibility)
//!
//! start_service(cfg) ──► host.start_service ──► persist last config
//!                    ──► registry running ──► scheduler.start ──► recovery.start
//!
//! run_until_shutdown()
//!   wait_for_shutdown_signal()
//!     └─► ShutdownRequested
//!     └─► runtime token cancelled (every in-flight action token)
//!     └─► recovery.stop, scheduler.stop, registry.wait_idle (all within grace)
//!           ├─ idle in time   → AllStoppedWithin
//!           └─ still running  → GraceExceeded + RuntimeError::GraceExceeded
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use taskwarden::{ActionFn, ActionRef, Config, RuntimeBuilder, ServiceConfig, TaskOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = RuntimeBuilder::new(Config::default()).build();
//!     runtime.initialize().await;
//!
//!     let ping: ActionRef = ActionFn::arc(|_ctx: CancellationToken| async move {
//!         Ok(serde_json::json!("pong"))
//!     });
//!     let id = runtime
//!         .add_task(ping, TaskOptions::new().id("ping").looping(Duration::from_secs(60)))
//!         .await?;
//!     assert_eq!(id, "ping");
//!
//!     runtime.start_service(ServiceConfig::new(1).with_title("Sync")).await?;
//!     assert!(runtime.status().await.service_running);
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::recovery::{RecoveryEngine, RecoveryOutcome, RecoveryStatus};
use crate::core::registry::Registry;
use crate::core::scheduler::{Scheduler, SchedulerStatus};
use crate::core::shutdown;
use crate::error::{RegistryError, RuntimeError, ServiceError};
use crate::events::{Bus, Event, EventKind, Listener};
use crate::host::{ExecutionHost, HostEvent, ServiceConfig, Visibility, VisibilitySource};
use crate::store::keys;
use crate::subscribers::SubscriberSet;
use crate::tasks::{ActionRef, TaskInfo, TaskOptions};

/// Point-in-time view of the whole runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeStatus {
    /// Scheduler snapshot.
    pub scheduler: SchedulerStatus,
    /// Recovery engine snapshot.
    pub recovery: RecoveryStatus,
    /// Registry-level belief that the service runs.
    pub service_running: bool,
    /// Registered tasks.
    pub task_count: usize,
}

/// Bus → subscriber set forwarding task.
struct Fanout {
    stop: CancellationToken,
    join: JoinHandle<()>,
    set: Arc<SubscriberSet>,
}

/// Service lifecycle facade over the registry, scheduler and recovery engine.
pub struct Runtime {
    cfg: Config,
    bus: Bus,
    registry: Arc<Registry>,
    scheduler: Arc<Scheduler>,
    recovery: RecoveryEngine,
    host: Option<Arc<dyn ExecutionHost>>,
    visibility: VisibilitySource,
    runtime_token: CancellationToken,
    fanout: Mutex<Option<Fanout>>,
    listeners: Mutex<Vec<Listener>>,
}

impl Runtime {
    /// Assembles a runtime from parts created by the builder and starts the
    /// subscriber fan-out.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        cfg: Config,
        registry: Arc<Registry>,
        scheduler: Arc<Scheduler>,
        recovery: RecoveryEngine,
        host: Option<Arc<dyn ExecutionHost>>,
        visibility: VisibilitySource,
        runtime_token: CancellationToken,
        subs: SubscriberSet,
    ) -> Self {
        let bus = registry.bus().clone();
        let fanout = (!subs.is_empty()).then(|| spawn_fanout(&bus, Arc::new(subs)));
        Self {
            cfg,
            bus,
            registry,
            scheduler,
            recovery,
            host,
            visibility,
            runtime_token,
            fanout: Mutex::new(fanout),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The task registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The adaptive scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The recovery engine.
    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    /// The event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Runtime-wide configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    // ---- service lifecycle ----

    /// Restores persisted tasks and service state, then restarts the service
    /// from its last start config when auto-restart is enabled.
    ///
    /// Returns the number of restored tasks. A failed auto-restart is logged;
    /// the runtime stays usable.
    pub async fn initialize(&self) -> usize {
        let restored = self.registry.initialize().await;
        if !self.auto_restart().await {
            return restored;
        }

        match self.registry.load::<ServiceConfig>(keys::LAST_CONFIG).await {
            Ok(Some(config)) => {
                info!(id = config.id, "auto-restarting service from last config");
                if let Err(e) = self.start_service(config).await {
                    warn!(label = e.as_label(), error = %e, "auto-restart failed");
                }
            }
            Ok(None) => debug!("auto-restart enabled but no start config saved"),
            Err(e) => self.registry.report(&e),
        }
        restored
    }

    /// Starts the background execution context and begins polling.
    ///
    /// Rejects a config with id `0`. Host failures are returned and leave the
    /// registry untouched.
    pub async fn start_service(&self, config: ServiceConfig) -> Result<(), ServiceError> {
        config.validate()?;
        if let Some(host) = &self.host {
            host.start_service(&config)
                .await
                .inspect_err(|e| warn!(host = host.name(), error = %e, "host refused to start"))?;
        }

        let id = config.id;
        self.registry.persist(keys::LAST_CONFIG, &config).await;
        self.registry.set_service_running(true, Some(config)).await;
        self.scheduler.start().await;
        if self.cfg.enable_recovery {
            self.recovery.start().await;
        }

        info!(id, "service started");
        self.bus.publish(Event::new(EventKind::ServiceStarted));
        Ok(())
    }

    /// Updates the running context in place.
    ///
    /// When the id matches the last start config, `config` is merged into it
    /// so fields left empty keep their previous values.
    pub async fn update_service(&self, config: ServiceConfig) -> Result<(), ServiceError> {
        config.validate()?;
        if let Some(host) = &self.host {
            host.update_service(&config)
                .await
                .inspect_err(|e| warn!(host = host.name(), error = %e, "host refused to update"))?;
        }

        let merged = match self.registry.load::<ServiceConfig>(keys::LAST_CONFIG).await {
            Ok(Some(mut last)) if last.id == config.id => {
                last.merge(&config);
                last
            }
            Ok(_) => config,
            Err(e) => {
                self.registry.report(&e);
                config
            }
        };
        self.registry.persist(keys::LAST_CONFIG, &merged).await;
        if self.registry.is_service_running().await {
            self.registry.set_service_running(true, Some(merged)).await;
        }

        self.bus.publish(Event::new(EventKind::ServiceUpdated));
        Ok(())
    }

    /// Stops the context, the scheduler and the recovery monitor.
    pub async fn stop_service(&self) -> Result<(), ServiceError> {
        self.halt(false).await
    }

    /// Like [`Runtime::stop_service`] but asks the host to stop every context it owns.
    pub async fn stop_all_services(&self) -> Result<(), ServiceError> {
        self.halt(true).await
    }

    async fn halt(&self, all: bool) -> Result<(), ServiceError> {
        // Recovery must not restart what is being stopped.
        self.recovery.stop().await;

        if let Some(host) = &self.host {
            let stopped = if all {
                host.stop_all_services().await
            } else {
                host.stop_service().await
            };
            if let Err(e) = stopped {
                warn!(host = host.name(), error = %e, "host refused to stop");
                if self.cfg.enable_recovery && self.registry.is_service_running().await {
                    self.recovery.start().await;
                }
                return Err(e);
            }
        }

        self.scheduler.stop().await;
        self.registry.set_service_running(false, None).await;
        info!(all, "service stopped");
        self.bus.publish(Event::new(EventKind::ServiceStopped));
        Ok(())
    }

    /// Persists whether [`Runtime::initialize`] restarts the service.
    pub async fn set_auto_restart(&self, enabled: bool) {
        self.registry.persist(keys::AUTO_RESTART, &enabled).await;
        self.bus
            .publish(Event::new(EventKind::AutoRestartChanged).with_running(enabled));
    }

    /// Persisted auto-restart flag, or [`Config::auto_restart`] when none is stored.
    pub async fn auto_restart(&self) -> bool {
        match self.registry.load::<bool>(keys::AUTO_RESTART).await {
            Ok(flag) => flag.unwrap_or(self.cfg.auto_restart),
            Err(e) => {
                self.registry.report(&e);
                self.cfg.auto_restart
            }
        }
    }

    /// Runs every due task once, sequentially.
    ///
    /// For hosts that wake the process periodically instead of keeping the
    /// scheduler alive. Returns the number of tasks run.
    pub async fn execute_task_runner(&self) -> usize {
        self.registry.execute_due_tasks().await
    }

    /// Reports a foreground/background transition. Returns `true` if the
    /// visibility actually changed.
    pub fn set_visibility(&self, visibility: Visibility) -> bool {
        self.visibility.set(visibility)
    }

    /// Forwards an unsolicited host notification to the recovery engine.
    pub async fn handle_host_event(&self, event: HostEvent) -> Option<RecoveryOutcome> {
        self.recovery.handle_host_event(event).await
    }

    /// Combined snapshot.
    pub async fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            scheduler: self.scheduler.status(),
            recovery: self.recovery.status(),
            service_running: self.registry.is_service_running().await,
            task_count: self.registry.task_count().await,
        }
    }

    // ---- tasks ----

    /// See [`Registry::add_task`].
    pub async fn add_task(
        &self,
        action: ActionRef,
        options: TaskOptions,
    ) -> Result<String, RegistryError> {
        self.registry.add_task(action, options).await
    }

    /// See [`Registry::update_task`].
    pub async fn update_task(
        &self,
        id: &str,
        action: Option<ActionRef>,
        options: TaskOptions,
    ) -> Result<(), RegistryError> {
        self.registry.update_task(id, action, options).await
    }

    /// See [`Registry::attach_action`].
    pub async fn attach_action(&self, id: &str, action: ActionRef) -> Result<(), RegistryError> {
        self.registry.attach_action(id, action).await
    }

    /// See [`Registry::remove_task`].
    pub async fn remove_task(&self, id: &str) -> bool {
        self.registry.remove_task(id).await
    }

    /// See [`Registry::remove_all_tasks`].
    pub async fn remove_all_tasks(&self) {
        self.registry.remove_all_tasks().await
    }

    /// See [`Registry::pause_task`].
    pub async fn pause_task(&self, id: &str) -> bool {
        self.registry.pause_task(id).await
    }

    /// See [`Registry::resume_task`].
    pub async fn resume_task(&self, id: &str) -> bool {
        self.registry.resume_task(id).await
    }

    /// See [`Registry::execute_task_with_timeout`].
    pub async fn execute_task(&self, id: &str) -> Result<Value, RegistryError> {
        self.registry.execute_task_with_timeout(id).await
    }

    /// See [`Registry::get_task`].
    pub async fn get_task(&self, id: &str) -> Option<TaskInfo> {
        self.registry.get_task(id).await
    }

    /// See [`Registry::all_tasks`].
    pub async fn all_tasks(&self) -> Vec<TaskInfo> {
        self.registry.all_tasks().await
    }

    // ---- listeners ----

    /// Registers a synchronous listener for one event kind.
    ///
    /// The returned [`Listener`] removes it again; so does
    /// [`Runtime::remove_all_event_listeners`].
    pub fn add_event_listener<F>(&self, kind: EventKind, f: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let listener = self.bus.add_listener(kind, f);
        let mut tracked = self.lock_listeners();
        tracked.retain(Listener::is_active);
        tracked.push(listener.clone());
        listener
    }

    /// Removes every listener added through [`Runtime::add_event_listener`].
    /// Internal listeners stay. Returns how many were removed.
    pub fn remove_all_event_listeners(&self) -> usize {
        let drained: Vec<Listener> = self.lock_listeners().drain(..).collect();
        drained
            .into_iter()
            .map(Listener::unsubscribe)
            .filter(|removed| *removed)
            .count()
    }

    // ---- shutdown ----

    /// Waits for a termination signal, then runs [`Runtime::shutdown`].
    pub async fn run_until_shutdown(&self) -> Result<(), RuntimeError> {
        if let Err(e) = shutdown::wait_for_shutdown_signal().await {
            warn!(error = %e, "cannot listen for signals; shutting down now");
        }
        self.shutdown().await
    }

    /// Cancels in-flight actions and stops every loop within [`Config::grace`].
    ///
    /// The persisted service state is left as is, so a later
    /// [`Runtime::initialize`] can restart the service.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let started = Instant::now();

        info!(grace_ms = grace.as_millis() as u64, "shutdown requested");
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.runtime_token.cancel();

        let loops = time::timeout(grace, async {
            self.recovery.stop().await;
            self.scheduler.stop().await;
        })
        .await;
        if loops.is_err() {
            warn!("scheduler did not stop within the grace period");
        }

        let left = grace.saturating_sub(started.elapsed());
        let res = match self.registry.wait_idle(left).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(stuck) => {
                warn!(?stuck, "grace period exceeded");
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };

        self.drain_subscribers().await;
        res
    }

    /// Delivers what is left on the bus and waits for subscriber queues to drain.
    async fn drain_subscribers(&self) {
        let fanout = { self.lock_fanout().take() };
        let Some(fanout) = fanout else {
            return;
        };
        fanout.stop.cancel();
        if let Err(e) = fanout.join.await {
            warn!(error = %e, "subscriber fan-out ended abnormally");
        }
        match Arc::try_unwrap(fanout.set) {
            Ok(set) => set.shutdown().await,
            Err(_) => debug!("subscriber set still shared; workers finish on their own"),
        }
    }

    fn lock_fanout(&self) -> MutexGuard<'_, Option<Fanout>> {
        self.fanout.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("cfg", &self.cfg)
            .field("host", &self.host.as_ref().map(|h| h.name()))
            .field("visibility", &self.visibility.current())
            .finish_non_exhaustive()
    }
}

/// Forwards bus events to the subscriber set until stopped; pending events
/// are delivered before it exits.
fn spawn_fanout(bus: &Bus, set: Arc<SubscriberSet>) -> Fanout {
    let mut rx = bus.subscribe();
    let stop = CancellationToken::new();
    let token = stop.clone();
    let sink = Arc::clone(&set);

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                recv = rx.recv() => match recv {
                    Ok(ev) => sink.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber fan-out lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = token.cancelled() => {
                    while let Ok(ev) = rx.try_recv() {
                        sink.emit(&ev);
                    }
                    break;
                }
            }
        }
    });

    Fanout { stop, join, set }
}
