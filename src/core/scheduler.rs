//! # Adaptive scheduler.
//!
//! Owns the polling loop: on every firing it asks the [`Registry`] for due
//! tasks, runs them in bounded batches, and retunes its own interval from the
//! workload and the host's visibility.
//!
//! ## Architecture
//! ```text
//! Scheduler::start() ──► spawn drive()
//!
//! drive() loop, select! over:
//!   ├─► sleep_until(deadline)  ─► run_cycle() ─► deadline = now + next_delay()
//!   ├─► Command::Force         ─► run_cycle() ─► deadline = now + next_delay()
//!   ├─► Command::Reschedule    ─► deadline = now + next_delay()
//!   ├─► visibility changed     ─► foreground: interval=min, idle=0, deadline=now
//!   │                             background: interval += 2×step (deadline kept)
//!   └─► Command::Stop          ─► break (after the current cycle settled)
//!
//! run_cycle():
//!   due = registry.due_tasks()                   (priority order)
//!   for batch in due.chunks(max_concurrent_tasks):
//!       join_all(batch.map(execute_task_with_timeout))   (batch N+1 waits for N)
//! ```
//!
//! ## Interval rules
//! - Due tasks this cycle → interval resets to `min_interval`, idle time to zero.
//! - Otherwise idle time grows by the time since the previous cycle; once it
//!   exceeds `idle_threshold` the interval grows by `interval_step` up to
//!   `max_interval`.
//! - In background the delay actually slept is `min(2 × interval, max_interval)`.
//!
//! ## Rules
//! - A failed (panicked) cycle is logged and published as
//!   `SchedulerCycleFailed`; the loop reschedules regardless.
//! - `stop()` never interrupts running actions; it returns once the cycle in
//!   progress has drained.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::core::registry::Registry;
use crate::events::{Bus, Event, EventKind};
use crate::host::{Visibility, VisibilitySource};

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStatus {
    /// Loop is active.
    pub running: bool,
    /// Interval before background doubling.
    pub current_interval: Duration,
    /// Actions in flight right now.
    pub pending_tasks: usize,
    /// Accumulated time without due tasks.
    pub idle_time: Duration,
    /// Last visibility observed.
    pub visibility: Visibility,
    /// Active configuration.
    pub config: SchedulerConfig,
}

enum Command {
    Force,
    Reschedule,
    Stop,
}

struct Driver {
    tx: mpsc::UnboundedSender<Command>,
    join: JoinHandle<()>,
}

struct State {
    running: bool,
    current_interval: Duration,
    idle_time: Duration,
    visibility: Visibility,
    last_cycle: Instant,
    config: SchedulerConfig,
}

struct Inner {
    registry: Arc<Registry>,
    bus: Bus,
    visibility: VisibilitySource,
    state: Mutex<State>,
    in_flight: AtomicUsize,
}

/// Polling loop with a self-tuning interval and a concurrency cap.
pub struct Scheduler {
    inner: Arc<Inner>,
    driver: tokio::sync::Mutex<Option<Driver>>,
}

impl Scheduler {
    /// Creates a stopped scheduler.
    pub fn new(registry: Arc<Registry>, visibility: VisibilitySource, config: SchedulerConfig) -> Self {
        let bus = registry.bus().clone();
        let state = State {
            running: false,
            current_interval: config.min_interval_clamped(),
            idle_time: Duration::ZERO,
            visibility: visibility.current(),
            last_cycle: Instant::now(),
            config,
        };
        Self {
            inner: Arc::new(Inner {
                registry,
                bus,
                visibility,
                state: Mutex::new(state),
                in_flight: AtomicUsize::new(0),
            }),
            driver: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts the loop; the first poll fires after `min_interval`.
    /// Calling it while running does nothing.
    pub async fn start(&self) {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return;
        }

        {
            let mut st = self.inner.lock();
            st.running = true;
            st.current_interval = st.config.min_interval_clamped();
            st.idle_time = Duration::ZERO;
            st.visibility = self.inner.visibility.current();
            st.last_cycle = Instant::now();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(drive(Arc::clone(&self.inner), rx));
        *driver = Some(Driver { tx, join });

        debug!("scheduler started");
        self.inner
            .bus
            .publish(Event::new(EventKind::SchedulerStarted));
    }

    /// Stops the loop after the cycle in progress (if any) has settled.
    /// Calling it while stopped does nothing.
    pub async fn stop(&self) {
        let Some(driver) = self.driver.lock().await.take() else {
            return;
        };
        let _ = driver.tx.send(Command::Stop);
        if let Err(e) = driver.join.await {
            warn!(error = %e, "scheduler driver ended abnormally");
        }
        self.inner.lock().running = false;

        debug!("scheduler stopped");
        self.inner
            .bus
            .publish(Event::new(EventKind::SchedulerStopped));
    }

    /// Cancels the pending timer and polls right away.
    pub async fn force_execution(&self) {
        if let Some(driver) = self.driver.lock().await.as_ref() {
            let _ = driver.tx.send(Command::Force);
        }
    }

    /// Replaces the configuration and reschedules the next poll.
    pub async fn update_config(&self, config: SchedulerConfig) {
        {
            let mut st = self.inner.lock();
            st.current_interval = if config.adaptive_scheduling {
                let floor = config.min_interval_clamped();
                st.current_interval.clamp(floor, config.max_interval.max(floor))
            } else {
                config.min_interval_clamped()
            };
            st.config = config;
        }
        if let Some(driver) = self.driver.lock().await.as_ref() {
            let _ = driver.tx.send(Command::Reschedule);
        }
    }

    /// Whether the loop is active.
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Current status snapshot.
    pub fn status(&self) -> SchedulerStatus {
        let st = self.inner.lock();
        SchedulerStatus {
            running: st.running,
            current_interval: st.current_interval,
            pending_tasks: self.inner.in_flight.load(Ordering::SeqCst),
            idle_time: st.idle_time,
            visibility: st.visibility,
            config: st.config.clone(),
        }
    }
}

async fn drive(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut vis_rx = inner.visibility.subscribe();
    let mut deadline = Instant::now() + inner.next_delay();

    loop {
        let adaptive = inner.lock().config.adaptive_scheduling;
        tokio::select! {
            _ = time::sleep_until(deadline) => {
                inner.run_cycle().await;
                deadline = Instant::now() + inner.next_delay();
            }
            cmd = rx.recv() => match cmd {
                Some(Command::Force) => {
                    inner.run_cycle().await;
                    deadline = Instant::now() + inner.next_delay();
                }
                Some(Command::Reschedule) => {
                    deadline = Instant::now() + inner.next_delay();
                }
                Some(Command::Stop) | None => break,
            },
            changed = vis_rx.changed(), if adaptive => {
                if changed.is_err() {
                    continue;
                }
                let visibility = *vis_rx.borrow_and_update();
                if inner.on_visibility(visibility) {
                    deadline = Instant::now();
                }
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Delay until the next poll, background doubling included.
    fn next_delay(&self) -> Duration {
        let st = self.lock();
        let base = st.current_interval;
        if st.config.adaptive_scheduling && st.visibility == Visibility::Background {
            st.config.cap(base.saturating_mul(2))
        } else {
            base
        }
    }

    async fn run_cycle(&self) {
        let due = match AssertUnwindSafe(self.cycle()).catch_unwind().await {
            Ok(due) => due,
            Err(_) => {
                warn!("scheduler cycle panicked; rescheduling");
                self.bus.publish(
                    Event::new(EventKind::SchedulerCycleFailed).with_reason("cycle panicked"),
                );
                0
            }
        };
        self.adjust(due);
    }

    /// Runs due tasks in batches. Returns the number of due tasks found.
    async fn cycle(&self) -> usize {
        let (require_running, batch_size) = {
            let st = self.lock();
            (st.config.require_service_running, st.config.batch_size())
        };
        if require_running && !self.registry.is_service_running().await {
            return 0;
        }

        let due = self.registry.due_tasks().await;
        for batch in due.chunks(batch_size) {
            join_all(batch.iter().map(|id| self.run_one(id))).await;
        }
        due.len()
    }

    async fn run_one(&self, id: &str) {
        let _slot = InFlightSlot::take(&self.in_flight);
        if let Err(e) = self.registry.execute_task_with_timeout(id).await {
            debug!(task = id, label = e.as_label(), "scheduled run failed");
        }
    }

    fn adjust(&self, due: usize) {
        let now = Instant::now();
        let mut st = self.lock();
        let since = now.saturating_duration_since(st.last_cycle);
        st.last_cycle = now;

        if !st.config.adaptive_scheduling {
            st.current_interval = st.config.min_interval_clamped();
            return;
        }
        if due > 0 {
            st.current_interval = st.config.min_interval_clamped();
            st.idle_time = Duration::ZERO;
            return;
        }
        st.idle_time = st.idle_time.saturating_add(since);
        if st.idle_time > st.config.idle_threshold {
            let grown = st.current_interval.saturating_add(st.config.interval_step);
            st.current_interval = st.config.cap(grown);
        }
    }

    /// Applies a visibility transition. Returns `true` if a poll is due now.
    fn on_visibility(&self, visibility: Visibility) -> bool {
        let (poll_now, interval) = {
            let mut st = self.lock();
            if st.visibility == visibility {
                return false;
            }
            st.visibility = visibility;
            let poll_now = match visibility {
                Visibility::Foreground => {
                    st.current_interval = st.config.min_interval_clamped();
                    st.idle_time = Duration::ZERO;
                    true
                }
                Visibility::Background => {
                    let grown = st
                        .current_interval
                        .saturating_add(st.config.interval_step.saturating_mul(2));
                    st.current_interval = st.config.cap(grown);
                    false
                }
            };
            (poll_now, st.current_interval)
        };

        debug!(%visibility, interval_ms = interval.as_millis() as u64, "visibility changed");
        self.bus.publish(
            Event::new(EventKind::VisibilityChanged)
                .with_visibility(visibility)
                .with_delay(interval),
        );
        poll_now
    }
}

/// Counts one in-flight action for as long as it lives.
struct InFlightSlot<'a>(&'a AtomicUsize);

impl<'a> InFlightSlot<'a> {
    fn take(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::clock::Clock;
    use crate::store::MemoryStore;
    use crate::tasks::{ActionFn, ActionRef, TaskOptions};
    use tokio_util::sync::CancellationToken;

    async fn running_registry() -> Arc<Registry> {
        let reg = Registry::new(
            Config::default(),
            Bus::new(256),
            Arc::new(MemoryStore::new()),
            Clock::new(),
            CancellationToken::new(),
        );
        reg.set_service_running(true, None).await;
        reg
    }

    fn instant_action() -> ActionRef {
        ActionFn::arc(|_ctx: CancellationToken| async move { Ok(serde_json::Value::Null) })
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn idle_interval_grows_by_step_until_capped() {
        let reg = running_registry().await;
        let sched = Scheduler::new(reg, VisibilitySource::default(), SchedulerConfig::default());
        sched.start().await;

        time::sleep(ms(10_400)).await;
        assert_eq!(sched.status().current_interval, ms(500));

        time::sleep(ms(200)).await;
        assert_eq!(sched.status().current_interval, ms(1_000));

        time::sleep(ms(1_000)).await;
        assert_eq!(sched.status().current_interval, ms(1_500));

        time::sleep(ms(28_400)).await;
        assert_eq!(sched.status().current_interval, ms(5_000));

        sched.stop().await;
        assert!(!sched.status().running);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_batch_size() {
        let reg = running_registry().await;
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..7 {
            let (c, p) = (Arc::clone(&current), Arc::clone(&peak));
            let action: ActionRef = ActionFn::arc(move |_ctx: CancellationToken| {
                let (c, p) = (Arc::clone(&c), Arc::clone(&p));
                async move {
                    let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    time::sleep(ms(100)).await;
                    c.fetch_sub(1, Ordering::SeqCst);
                    Ok(serde_json::Value::Null)
                }
            });
            reg.add_task(action, TaskOptions::new())
                .await
                .expect("add");
        }

        let sched = Scheduler::new(
            Arc::clone(&reg),
            VisibilitySource::default(),
            SchedulerConfig::default(),
        );
        sched.start().await;
        time::sleep(ms(2_000)).await;
        sched.stop().await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(reg.task_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_bumps_interval_and_foreground_polls_now() {
        let reg = running_registry().await;
        let visibility = VisibilitySource::default();
        let sched = Scheduler::new(
            Arc::clone(&reg),
            visibility.clone(),
            SchedulerConfig::default(),
        );
        sched.start().await;

        visibility.set(Visibility::Background);
        time::sleep(ms(1)).await;
        let st = sched.status();
        assert_eq!(st.current_interval, ms(1_500));
        assert_eq!(st.visibility, Visibility::Background);

        // Cycle at 500ms finds nothing; next poll is 3000ms later.
        time::sleep(ms(599)).await;
        let id = reg
            .add_task(instant_action(), TaskOptions::new())
            .await
            .expect("add");
        time::sleep(ms(200)).await;
        assert!(reg.get_task(&id).await.is_some());

        visibility.set(Visibility::Foreground);
        time::sleep(ms(1)).await;
        assert!(reg.get_task(&id).await.is_none());
        assert_eq!(sched.status().current_interval, ms(500));
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_actions() {
        let reg = running_registry().await;
        let action: ActionRef = ActionFn::arc(|_ctx: CancellationToken| async move {
            time::sleep(ms(300)).await;
            Ok(serde_json::Value::Null)
        });
        reg.add_task(action, TaskOptions::new().id("slow"))
            .await
            .expect("add");

        let sched = Scheduler::new(
            Arc::clone(&reg),
            VisibilitySource::default(),
            SchedulerConfig::default(),
        );
        sched.start().await;
        time::sleep(ms(550)).await;
        assert_eq!(sched.status().pending_tasks, 1);

        let before = Instant::now();
        sched.stop().await;
        assert!(Instant::now() - before >= ms(250));
        assert_eq!(sched.status().pending_tasks, 0);
        assert!(reg.get_task("slow").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn force_execution_skips_the_wait() {
        let reg = running_registry().await;
        let cfg = SchedulerConfig {
            min_interval: Duration::from_secs(5),
            ..SchedulerConfig::default()
        };
        let sched = Scheduler::new(Arc::clone(&reg), VisibilitySource::default(), cfg);
        sched.start().await;

        let id = reg
            .add_task(instant_action(), TaskOptions::new())
            .await
            .expect("add");
        time::sleep(ms(200)).await;
        assert!(reg.get_task(&id).await.is_some());

        sched.force_execution().await;
        time::sleep(ms(1)).await;
        assert!(reg.get_task(&id).await.is_none());
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_are_skipped_while_service_is_down() {
        let reg = running_registry().await;
        reg.set_service_running(false, None).await;
        let id = reg
            .add_task(instant_action(), TaskOptions::new())
            .await
            .expect("add");

        let sched = Scheduler::new(
            Arc::clone(&reg),
            VisibilitySource::default(),
            SchedulerConfig::default(),
        );
        sched.start().await;
        time::sleep(ms(2_000)).await;
        assert!(reg.get_task(&id).await.is_some());
        sched.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let reg = running_registry().await;
        let sched = Scheduler::new(reg, VisibilitySource::default(), SchedulerConfig::default());
        sched.stop().await;
        sched.start().await;
        sched.start().await;
        assert!(sched.is_running());
        sched.stop().await;
        sched.stop().await;
        assert!(!sched.is_running());
    }
}
