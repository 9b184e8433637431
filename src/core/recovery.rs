//! # Recovery engine.
//!
//! Guards against the host's execution context dying silently. The engine
//! compares what the [`Registry`] believes (service running, start config
//! known) with what the [`ExecutionHost`] reports, and restarts the context
//! under a throttle, an attempt ceiling and exponential backoff.
//!
//! ## Phases
//! ```text
//! Idle ──start()──► Monitoring ──mismatch / foreground / host event──► Recovering
//!   ▲                   ▲                                                  │
//!   └──stop()───────────┤◄── Success (counters reset) ─────────────────────┤
//!                       │◄── Throttled (attempts unchanged) ───────────────┤
//!                       │◄── Failed (retry scheduled if attempts remain) ──┤
//!                       │                                                  │
//!                   reset() ◄── Exhausted (no restart until reset) ◄───────┘
//! ```
//!
//! ## recover_service
//! 1. Inside the throttle window of the last attempt → `RecoveryThrottled`, no count.
//! 2. `attempts >= max_recovery_attempts` → `RecoveryMaxAttemptsReached`, no restart.
//! 3. Count the attempt, stamp it, publish `RecoveryAttempt` with its backoff delay.
//! 4. Restart through the host when one is wired (a missing start config
//!    fails the attempt); without a host, mark the registry running, start
//!    the scheduler and force a poll.
//! 5. `RecoverySuccess` or `RecoveryFailed`.
//!
//! ## Counter reset
//! Every `ServiceStateChanged { running: true }` resets the attempt counter
//! (and with it the backoff delay). [`RecoveryEngine::reset`] also clears the
//! throttle window.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::core::clock::Clock;
use crate::core::registry::Registry;
use crate::core::scheduler::Scheduler;
use crate::error::RecoveryError;
use crate::events::{Bus, Event, EventKind, Listener};
use crate::host::{ExecutionHost, HostEvent, ServiceConfig, Visibility, VisibilitySource};

/// Where the engine is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    /// Not monitoring.
    Idle,
    /// Health checks and visibility are watched.
    Monitoring,
    /// An attempt is in progress.
    Recovering,
    /// The attempt ceiling was reached; only a reset (explicit or through a
    /// confirmed running state) re-enables recovery.
    Exhausted,
}

/// Result of one call to [`RecoveryEngine::recover_service`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The service was restarted.
    Success {
        /// Attempt number that succeeded.
        attempt: u32,
    },
    /// Rejected inside the throttle window; the counter did not move.
    Throttled {
        /// Time left in the window.
        retry_in: Duration,
    },
    /// Rejected by the attempt ceiling; the restart path was not invoked.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The restart was tried and failed.
    Failed {
        /// Attempt number that failed.
        attempt: u32,
        /// Why.
        error: RecoveryError,
    },
}

impl RecoveryOutcome {
    /// `true` for [`RecoveryOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, RecoveryOutcome::Success { .. })
    }

    /// Success as the attempt number, everything else as a [`RecoveryError`].
    pub fn into_result(self) -> Result<u32, RecoveryError> {
        match self {
            RecoveryOutcome::Success { attempt } => Ok(attempt),
            RecoveryOutcome::Throttled { retry_in } => Err(RecoveryError::Throttled { retry_in }),
            RecoveryOutcome::Exhausted { attempts } => Err(RecoveryError::Exhausted { attempts }),
            RecoveryOutcome::Failed { error, .. } => Err(error),
        }
    }
}

/// Last running flag seen on `ServiceStateChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSnapshot {
    /// Reported flag.
    pub running: bool,
    /// When it was reported (epoch ms).
    pub observed_at: u64,
}

/// Point-in-time view of the recovery engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryStatus {
    /// State machine phase.
    pub phase: RecoveryPhase,
    /// Monitor task is running.
    pub monitoring: bool,
    /// Attempts since the last reset.
    pub attempts: u32,
    /// Epoch ms of the last attempt.
    pub last_recovery_at: Option<u64>,
    /// Backoff delay of the next attempt.
    pub current_backoff_delay: Duration,
    /// Last service state change observed.
    pub last_service_state: Option<ServiceSnapshot>,
    /// Active configuration.
    pub config: RecoveryConfig,
}

struct State {
    phase: RecoveryPhase,
    monitoring: bool,
    attempts: u32,
    last_recovery: Option<Instant>,
    last_recovery_at: Option<u64>,
    last_service_state: Option<ServiceSnapshot>,
    retry_at: Option<Instant>,
    config: RecoveryConfig,
}

impl State {
    fn resting_phase(&self) -> RecoveryPhase {
        if self.monitoring {
            RecoveryPhase::Monitoring
        } else {
            RecoveryPhase::Idle
        }
    }
}

struct Inner {
    registry: Arc<Registry>,
    scheduler: Arc<Scheduler>,
    host: Option<Arc<dyn ExecutionHost>>,
    visibility: VisibilitySource,
    bus: Bus,
    clock: Clock,
    state: Mutex<State>,
    wake: Notify,
}

struct Monitor {
    stop: CancellationToken,
    join: JoinHandle<()>,
}

/// Throttled, backoff-governed restarts of the host service.
pub struct RecoveryEngine {
    inner: Arc<Inner>,
    monitor: tokio::sync::Mutex<Option<Monitor>>,
    listener: Option<Listener>,
}

impl RecoveryEngine {
    /// Creates an idle engine and subscribes it to service state changes.
    pub fn new(
        registry: Arc<Registry>,
        scheduler: Arc<Scheduler>,
        host: Option<Arc<dyn ExecutionHost>>,
        visibility: VisibilitySource,
        config: RecoveryConfig,
    ) -> Self {
        let bus = registry.bus().clone();
        let clock = registry.clock();
        let inner = Arc::new(Inner {
            registry,
            scheduler,
            host,
            visibility,
            bus: bus.clone(),
            clock,
            state: Mutex::new(State {
                phase: RecoveryPhase::Idle,
                monitoring: false,
                attempts: 0,
                last_recovery: None,
                last_recovery_at: None,
                last_service_state: None,
                retry_at: None,
                config,
            }),
            wake: Notify::new(),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let listener = bus.add_listener(EventKind::ServiceStateChanged, move |ev| {
            if let (Some(inner), Some(running)) = (weak.upgrade(), ev.running) {
                inner.observe_service_state(running);
            }
        });

        Self {
            inner,
            monitor: tokio::sync::Mutex::new(None),
            listener: Some(listener),
        }
    }

    /// Starts health checks, foreground handling and failed-attempt retries.
    /// Calling it while monitoring does nothing.
    pub async fn start(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }
        {
            let mut st = self.inner.lock();
            st.monitoring = true;
            if st.phase == RecoveryPhase::Idle {
                st.phase = RecoveryPhase::Monitoring;
            }
        }
        let stop = CancellationToken::new();
        let join = tokio::spawn(monitor_loop(Arc::clone(&self.inner), stop.clone()));
        *monitor = Some(Monitor { stop, join });
        debug!("recovery monitor started");
    }

    /// Stops monitoring. An attempt in progress finishes first.
    pub async fn stop(&self) {
        let Some(monitor) = self.monitor.lock().await.take() else {
            return;
        };
        monitor.stop.cancel();
        if let Err(e) = monitor.join.await {
            warn!(error = %e, "recovery monitor ended abnormally");
        }
        let mut st = self.inner.lock();
        st.monitoring = false;
        st.retry_at = None;
        if st.phase != RecoveryPhase::Exhausted {
            st.phase = RecoveryPhase::Idle;
        }
        debug!("recovery monitor stopped");
    }

    /// Attempts to restart the service with `config` (or the registry's last
    /// known config when `None`).
    pub async fn recover_service(&self, config: Option<ServiceConfig>) -> RecoveryOutcome {
        self.inner.recover_service(config).await
    }

    /// Recovers when a start config is known but the service is down, either
    /// by the registry's flag or by the host's report. `None` if nothing to do.
    pub async fn check_and_recover_service(&self) -> Option<RecoveryOutcome> {
        self.inner.check_and_recover_service().await
    }

    /// Compares the registry's running flag with the host's. On mismatch
    /// publishes `ServiceStateInconsistency` and recovers.
    pub async fn perform_health_check(&self) -> Option<RecoveryOutcome> {
        self.inner.perform_health_check().await
    }

    /// Applies an unsolicited host notification.
    pub async fn handle_host_event(&self, event: HostEvent) -> Option<RecoveryOutcome> {
        self.inner.handle_host_event(event).await
    }

    /// Clears the attempt counter and the throttle window; leaves `Exhausted`.
    pub fn reset(&self) {
        let mut st = self.inner.lock();
        st.attempts = 0;
        st.last_recovery = None;
        st.retry_at = None;
        st.phase = st.resting_phase();
        debug!("recovery counters reset");
    }

    /// Replaces the configuration; the monitor picks it up immediately.
    pub fn update_config(&self, config: RecoveryConfig) {
        self.inner.lock().config = config;
        self.inner.wake.notify_one();
    }

    /// Current status snapshot.
    pub fn status(&self) -> RecoveryStatus {
        let st = self.inner.lock();
        RecoveryStatus {
            phase: st.phase,
            monitoring: st.monitoring,
            attempts: st.attempts,
            last_recovery_at: st.last_recovery_at,
            current_backoff_delay: st.config.backoff().next(st.attempts),
            last_service_state: st.last_service_state,
            config: st.config.clone(),
        }
    }
}

impl Drop for RecoveryEngine {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.unsubscribe();
        }
    }
}

async fn monitor_loop(inner: Arc<Inner>, stop: CancellationToken) {
    let mut vis_rx = inner.visibility.subscribe();
    let mut next_check = Instant::now() + inner.lock().config.health_check_interval_clamped();

    loop {
        let (health, interval, on_foreground, retry_at) = {
            let st = inner.lock();
            (
                st.config.enable_health_check,
                st.config.health_check_interval_clamped(),
                st.config.recover_on_foreground,
                st.retry_at,
            )
        };
        let retry = async move {
            match retry_at {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = time::sleep_until(next_check), if health => {
                inner.perform_health_check().await;
                next_check = Instant::now() + interval;
            }
            _ = retry => {
                inner.lock().retry_at = None;
                debug!("retrying failed recovery");
                inner.check_and_recover_service().await;
            }
            _ = inner.wake.notified() => {
                next_check = next_check.min(Instant::now() + interval);
            }
            changed = vis_rx.changed() => {
                if changed.is_err() {
                    continue;
                }
                let visibility = *vis_rx.borrow_and_update();
                if visibility == Visibility::Foreground && on_foreground {
                    inner.on_foreground().await;
                }
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// `ServiceStateChanged` listener body. Runs synchronously on the publisher.
    fn observe_service_state(&self, running: bool) {
        let mut st = self.lock();
        st.last_service_state = Some(ServiceSnapshot {
            running,
            observed_at: self.clock.now_ms(),
        });
        if running {
            st.attempts = 0;
            st.retry_at = None;
            if st.phase == RecoveryPhase::Exhausted {
                st.phase = st.resting_phase();
            }
        }
    }

    async fn recover_service(&self, config: Option<ServiceConfig>) -> RecoveryOutcome {
        let now = Instant::now();
        let (attempt, delay) = {
            let mut st = self.lock();
            let throttle = st.config.recovery_throttle_time;
            if let Some(last) = st.last_recovery {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < throttle {
                    let retry_in = throttle - elapsed;
                    drop(st);
                    debug!(retry_in_ms = retry_in.as_millis() as u64, "recovery throttled");
                    self.bus
                        .publish(Event::new(EventKind::RecoveryThrottled).with_delay(retry_in));
                    return RecoveryOutcome::Throttled { retry_in };
                }
            }
            if st.attempts >= st.config.max_recovery_attempts {
                let attempts = st.attempts;
                st.phase = RecoveryPhase::Exhausted;
                st.retry_at = None;
                drop(st);
                warn!(attempts, "recovery attempts exhausted");
                self.bus.publish(
                    Event::new(EventKind::RecoveryMaxAttemptsReached).with_attempt(attempts),
                );
                return RecoveryOutcome::Exhausted { attempts };
            }

            st.attempts += 1;
            st.last_recovery = Some(now);
            st.last_recovery_at = Some(self.clock.now_ms());
            st.retry_at = None;
            st.phase = RecoveryPhase::Recovering;
            (st.attempts, st.config.backoff().next(st.attempts - 1))
        };

        info!(attempt, delay_ms = delay.as_millis() as u64, "recovering service");
        self.bus.publish(
            Event::new(EventKind::RecoveryAttempt)
                .with_attempt(attempt)
                .with_delay(delay),
        );

        let config = match config {
            Some(c) => Some(c),
            None => self.registry.service_state().await.config,
        };

        match self.restart(config).await {
            Ok(()) => {
                {
                    let mut st = self.lock();
                    st.phase = st.resting_phase();
                }
                info!(attempt, "service recovered");
                self.bus
                    .publish(Event::new(EventKind::RecoverySuccess).with_attempt(attempt));
                RecoveryOutcome::Success { attempt }
            }
            Err(error) => {
                let will_retry = {
                    let mut st = self.lock();
                    let remaining = st.attempts < st.config.max_recovery_attempts;
                    st.phase = if remaining {
                        st.resting_phase()
                    } else {
                        RecoveryPhase::Exhausted
                    };
                    let retry = remaining && st.monitoring && st.config.retry_failed_recoveries;
                    if retry {
                        let throttle_left = st
                            .config
                            .recovery_throttle_time
                            .saturating_sub(Instant::now().saturating_duration_since(now));
                        st.retry_at = Some(Instant::now() + delay.max(throttle_left));
                    }
                    retry
                };
                if will_retry {
                    self.wake.notify_one();
                }

                warn!(attempt, error = %error, will_retry, "service recovery failed");
                self.bus.publish(
                    Event::new(EventKind::RecoveryFailed)
                        .with_attempt(attempt)
                        .with_reason(error.to_string())
                        .with_running(will_retry),
                );
                RecoveryOutcome::Failed { attempt, error }
            }
        }
    }

    /// Native restart through the host; direct registry/scheduler mutation without one.
    async fn restart(&self, config: Option<ServiceConfig>) -> Result<(), RecoveryError> {
        match (&self.host, config) {
            (Some(host), Some(config)) => {
                host.restart_service(&config)
                    .await
                    .map_err(|e| RecoveryError::Host {
                        error: e.to_string(),
                    })?;
                self.registry.set_service_running(true, Some(config)).await;
                self.scheduler.start().await;
            }
            (Some(_), None) => {
                return Err(RecoveryError::Host {
                    error: "no start config to restart the service with".into(),
                });
            }
            (None, config) => {
                self.registry.set_service_running(true, config).await;
                self.scheduler.start().await;
                self.scheduler.force_execution().await;
            }
        }
        Ok(())
    }

    async fn check_and_recover_service(&self) -> Option<RecoveryOutcome> {
        let state = self.registry.service_state().await;
        let config = state.config?;

        let down = !state.running || !self.host_reports_running(state.running).await;
        if !down {
            return None;
        }
        Some(self.recover_service(Some(config)).await)
    }

    async fn perform_health_check(&self) -> Option<RecoveryOutcome> {
        if !self.lock().config.enable_health_check {
            return None;
        }
        let state = self.registry.service_state().await;
        let config = state.config?;
        if !state.running || self.host_reports_running(true).await {
            return None;
        }

        let err = RecoveryError::ServiceStateInconsistency {
            expected: true,
            reported: false,
        };
        warn!(label = err.as_label(), "{err}");
        self.bus.publish(
            Event::new(EventKind::ServiceStateInconsistency)
                .with_running(false)
                .with_reason(err.to_string()),
        );
        Some(self.recover_service(Some(config)).await)
    }

    /// Host-reported flag; without a host the registry's own flag is used.
    /// A failing query counts as not running.
    async fn host_reports_running(&self, fallback: bool) -> bool {
        let Some(host) = &self.host else {
            return fallback;
        };
        match host.is_service_running().await {
            Ok(running) => running,
            Err(e) => {
                warn!(host = host.name(), error = %e, "service status query failed");
                false
            }
        }
    }

    async fn on_foreground(&self) {
        let outside_window = {
            let st = self.lock();
            st.last_recovery
                .is_none_or(|last| last.elapsed() > st.config.recovery_throttle_time)
        };
        if outside_window {
            self.check_and_recover_service().await;
        }
    }

    async fn handle_host_event(&self, event: HostEvent) -> Option<RecoveryOutcome> {
        match event {
            HostEvent::ServiceKilled => {
                warn!("host reported service killed");
                self.bus.publish(Event::new(EventKind::ServiceKilled));
                self.check_and_recover_service().await
            }
            HostEvent::ServiceRestarted { config } => {
                info!("host restarted service");
                self.bus
                    .publish(Event::new(EventKind::ServiceRestarted).with_running(true));
                if config.is_some() {
                    self.registry.set_service_running(true, config).await;
                }
                None
            }
            HostEvent::RecoveryFailed { reason } => {
                warn!(reason = %reason, "host-side recovery failed");
                self.bus
                    .publish(Event::new(EventKind::RecoveryFailed).with_reason(reason));
                None
            }
        }
    }
}
