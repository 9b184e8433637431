//! # Task registry and executor.
//!
//! The registry is the only owner of task records and of the service state.
//! The scheduler, the recovery engine and the runtime reach them through the
//! public operations below; nothing else holds the map.
//!
//! ## Architecture
//! ```text
//! callers ──► add/update/remove/pause/resume ──► tasks: id → Entry { descriptor, handle }
//!                                                   │
//! scheduler ──► due_tasks() ──► execute_task_with_timeout(id)
//!                                   ├─► in_flight[id] = RunGuard { token, disarm }
//!                                   ├─► runner::run_once (race vs timeout)
//!                                   ├─► bookkeeping + settle (loop → reschedule, one-shot → remove)
//!                                   ├─► persist descriptors
//!                                   └─► callbacks + TaskExecuted / TaskError
//! ```
//!
//! ## Rules
//! - Descriptors are persisted after every mutation; a store failure is
//!   logged, published as `PersistenceFailed`, and otherwise ignored.
//! - Exactly one of success/failure bookkeeping happens per invocation.
//! - A task that is still in flight is never started a second time.
//! - Pausing or removing a task disarms the timer of its in-flight run;
//!   the action itself keeps going.
//! - No lock is held across an action, a callback or a store call.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, UpdateMode};
use crate::core::clock::Clock;
use crate::core::runner::run_once;
use crate::error::{PersistenceError, RegistryError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::host::{ServiceConfig, ServiceState};
use crate::store::{DurableStore, keys};
use crate::tasks::options::{DEFAULT_LOOP_DELAY, floor_delay};
use crate::tasks::{ActionRef, TaskDescriptor, TaskHandle, TaskInfo, TaskOptions};

/// Descriptor plus the code bound to it (absent for restored tasks).
struct Entry {
    descriptor: TaskDescriptor,
    handle: Option<TaskHandle>,
}

/// Tokens of one in-flight invocation.
struct RunGuard {
    /// Handed to the action; cancelled on timeout and on shutdown.
    token: CancellationToken,
    /// Stops the timeout timer without touching the action.
    disarm: CancellationToken,
}

/// Task registry and executor.
pub struct Registry {
    tasks: RwLock<HashMap<String, Entry>>,
    in_flight: Mutex<HashMap<String, RunGuard>>,
    idle: Notify,
    service: RwLock<ServiceState>,

    store: Arc<dyn DurableStore>,
    bus: Bus,
    clock: Clock,
    cfg: Config,
    runtime_token: CancellationToken,

    next_seq: AtomicU64,
    next_id: AtomicU64,
}

impl Registry {
    /// Creates an empty registry. Call [`Registry::initialize`] to restore
    /// persisted state.
    pub fn new(
        cfg: Config,
        bus: Bus,
        store: Arc<dyn DurableStore>,
        clock: Clock,
        runtime_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            idle: Notify::new(),
            service: RwLock::new(ServiceState::default()),
            store,
            bus,
            clock,
            cfg,
            runtime_token,
            next_seq: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
        })
    }

    /// The bus this registry publishes to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The clock used for schedules.
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Restores persisted descriptors and the service state.
    ///
    /// Restored tasks come back **paused**, without an action, and with
    /// `next_execution_time = now + delay`. Ids already present in memory are
    /// left untouched. Returns the number of restored tasks; a failed load is
    /// logged and the registry continues with what it has.
    pub async fn initialize(&self) -> usize {
        let restored = match self.load_descriptors().await {
            Ok(list) => list,
            Err(e) => {
                self.report(&e);
                self.bus
                    .publish(Event::new(EventKind::Restored).with_reason(e.to_string()));
                return 0;
            }
        };

        let mut count = 0u32;
        {
            let mut tasks = self.tasks.write().await;
            for mut d in restored {
                if tasks.contains_key(&d.id) {
                    continue;
                }
                d.paused = true;
                d.next_execution_time = self.clock.after(d.delay());
                d.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                tasks.insert(
                    d.id.clone(),
                    Entry {
                        descriptor: d,
                        handle: None,
                    },
                );
                count += 1;
            }
        }

        match self.load_service_state().await {
            Ok(state) => *self.service.write().await = state,
            Err(e) => self.report(&e),
        }

        debug!(restored = count, "registry restored");
        self.bus
            .publish(Event::new(EventKind::Restored).with_attempt(count));
        count as usize
    }

    /// Registers a task and returns its id.
    ///
    /// - Unset options take defaults; `delay` and `loop_delay` are floored to 100ms.
    /// - `next_execution_time = now + delay`.
    /// - An existing task with the same id is replaced.
    /// - An empty explicit id is rejected with [`RegistryError::InvalidTask`].
    pub async fn add_task(
        &self,
        action: ActionRef,
        opts: TaskOptions,
    ) -> Result<String, RegistryError> {
        let id = match opts.task_id.as_deref() {
            Some("") => {
                return Err(RegistryError::InvalidTask {
                    reason: "task id must not be empty".into(),
                });
            }
            Some(id) => id.to_string(),
            None => self.generate_id(),
        };

        let descriptor = self.descriptor_from(&id, &opts);
        let handle = TaskHandle {
            action,
            on_success: opts.on_success,
            on_error: opts.on_error,
        };

        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(
                id.clone(),
                Entry {
                    descriptor,
                    handle: Some(handle),
                },
            );
        }

        self.persist_tasks().await;
        self.bus
            .publish(Event::new(EventKind::TaskAdded).with_task(id.as_str()));
        Ok(id)
    }

    /// Updates an existing task's policy (and optionally its action).
    ///
    /// Unset options keep the current values. The schedule is preserved unless
    /// `reset_timer` is set, in which case `next_execution_time = now + delay`.
    ///
    /// Unknown ids fail with [`RegistryError::TaskNotFound`] in
    /// [`UpdateMode::Strict`]; in [`UpdateMode::Upsert`] the task is created
    /// (an action is then required).
    pub async fn update_task(
        &self,
        id: &str,
        action: Option<ActionRef>,
        opts: TaskOptions,
    ) -> Result<(), RegistryError> {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(id) else {
            drop(tasks);
            return match (self.cfg.update_mode, action) {
                (UpdateMode::Upsert, Some(action)) => {
                    self.add_task(action, opts.id(id)).await.map(|_| ())
                }
                (UpdateMode::Upsert, None) => Err(RegistryError::InvalidTask {
                    reason: format!("cannot create task '{id}' without an action"),
                }),
                (UpdateMode::Strict, _) => Err(RegistryError::TaskNotFound { id: id.into() }),
            };
        };

        let d = &mut entry.descriptor;
        if let Some(delay) = opts.delay {
            d.delay_ms = floor_delay(delay).as_millis() as u64;
        }
        if let Some(loop_delay) = opts.loop_delay {
            d.loop_delay_ms = floor_delay(loop_delay).as_millis() as u64;
        }
        if let Some(looping) = opts.looping {
            d.looping = looping;
        }
        if let Some(priority) = opts.priority {
            d.priority = priority;
        }
        if let Some(timeout) = opts.timeout {
            d.timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(paused) = opts.paused {
            d.paused = paused;
        }
        if opts.reset_timer {
            d.next_execution_time = self.clock.after(d.delay());
        }

        match (entry.handle.as_mut(), action) {
            (Some(h), Some(action)) => h.action = action,
            (None, Some(action)) => entry.handle = Some(TaskHandle::new(action)),
            (_, None) => {}
        }
        if let Some(h) = entry.handle.as_mut() {
            if opts.on_success.is_some() {
                h.on_success = opts.on_success;
            }
            if opts.on_error.is_some() {
                h.on_error = opts.on_error;
            }
        }
        drop(tasks);

        self.persist_tasks().await;
        self.bus
            .publish(Event::new(EventKind::TaskUpdated).with_task(id));
        Ok(())
    }

    /// Binds code to a task (typically one restored without an action).
    /// The schedule and paused flag are left as they are.
    pub async fn attach_action(&self, id: &str, action: ActionRef) -> Result<(), RegistryError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| RegistryError::TaskNotFound { id: id.into() })?;
        match entry.handle.as_mut() {
            Some(h) => h.action = action,
            None => entry.handle = Some(TaskHandle::new(action)),
        }
        drop(tasks);

        self.bus
            .publish(Event::new(EventKind::TaskUpdated).with_task(id));
        Ok(())
    }

    /// Removes a task. Returns `false` if it was not registered.
    pub async fn remove_task(&self, id: &str) -> bool {
        let removed = self.tasks.write().await.remove(id).is_some();
        if !removed {
            return false;
        }
        self.disarm(id);
        self.persist_tasks().await;
        self.bus
            .publish(Event::new(EventKind::TaskRemoved).with_task(id));
        true
    }

    /// Drops every task.
    pub async fn remove_all_tasks(&self) {
        self.tasks.write().await.clear();
        self.disarm_all();
        self.persist_tasks().await;
        self.bus.publish(Event::new(EventKind::AllTasksRemoved));
    }

    /// Halts future dispatch of a task and disarms the timer of its current run.
    /// Returns `false` if the task is unknown.
    pub async fn pause_task(&self, id: &str) -> bool {
        {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks.get_mut(id) else {
                return false;
            };
            entry.descriptor.paused = true;
        }
        self.disarm(id);
        self.persist_tasks().await;
        self.bus
            .publish(Event::new(EventKind::TaskPaused).with_task(id));
        true
    }

    /// Resumes a paused task with `next_execution_time = now + delay`.
    /// Returns `false` if the task is unknown or not paused.
    pub async fn resume_task(&self, id: &str) -> bool {
        {
            let mut tasks = self.tasks.write().await;
            let Some(entry) = tasks.get_mut(id) else {
                return false;
            };
            if !entry.descriptor.paused {
                return false;
            }
            let d = &mut entry.descriptor;
            d.paused = false;
            d.next_execution_time = self.clock.after(d.delay());
        }
        self.persist_tasks().await;
        self.bus
            .publish(Event::new(EventKind::TaskResumed).with_task(id));
        true
    }

    /// Runs one invocation of a task raced against its timeout.
    ///
    /// On success the execution counter grows and `on_success` is called; on
    /// error or timeout the failure counter grows and `on_error` is called.
    /// Then the task settles: a looping task is rescheduled at
    /// `completion + loop_delay`, a one-shot task is removed. The error is
    /// returned to the caller as well.
    ///
    /// If the task is removed while running, the outcome is returned but no
    /// bookkeeping happens.
    pub async fn execute_task_with_timeout(&self, id: &str) -> Result<Value, RegistryError> {
        let (handle, timeout, attempt) = {
            let tasks = self.tasks.read().await;
            let entry = tasks
                .get(id)
                .ok_or_else(|| RegistryError::TaskNotFound { id: id.into() })?;
            let handle = entry
                .handle
                .clone()
                .ok_or_else(|| RegistryError::InvalidTask {
                    reason: format!("task '{id}' has no action attached"),
                })?;
            let d = &entry.descriptor;
            (handle, d.timeout(), d.attempts() + 1)
        };

        let guard = self.enter(id)?;
        self.bus.publish(
            Event::new(EventKind::TaskStarting)
                .with_task(id)
                .with_attempt(attempt as u32)
                .with_timeout(timeout),
        );

        let outcome = run_once(
            &*handle.action,
            id,
            guard.token,
            Some(timeout),
            &guard.disarm,
            &self.bus,
        )
        .await;

        let settled = self.settle(id, outcome.is_ok()).await;
        self.leave(id);
        if settled.is_some() {
            self.persist_tasks().await;
        }
        let callbacks = settled.is_some().then_some(&handle);

        match outcome {
            Ok(value) => {
                if let Some(cb) = callbacks.and_then(|h| h.on_success.as_ref()) {
                    guarded_callback(id, || cb(&value));
                }
                self.bus.publish(
                    Event::new(EventKind::TaskExecuted)
                        .with_task(id)
                        .with_attempt(attempt as u32)
                        .with_result(value.clone()),
                );
                if settled == Some(Settled::Removed) {
                    self.publish_removed(id);
                }
                Ok(value)
            }
            Err(err) => {
                warn!(task = id, label = err.as_label(), error = %err, "task execution failed");
                if let Some(cb) = callbacks.and_then(|h| h.on_error.as_ref()) {
                    guarded_callback(id, || cb(&err));
                }
                self.bus.publish(
                    Event::new(EventKind::TaskError)
                        .with_task(id)
                        .with_attempt(attempt as u32)
                        .with_reason(err.to_string()),
                );
                if settled == Some(Settled::Removed) {
                    self.publish_removed(id);
                }
                Err(RegistryError::Task(err))
            }
        }
    }

    /// Runs every due task one after another, in priority order.
    ///
    /// Failures are isolated per task. Returns the number of tasks invoked.
    pub async fn execute_due_tasks(&self) -> usize {
        let due = self.due_tasks().await;
        let mut ran = 0;
        for id in due {
            match self.execute_task_with_timeout(&id).await {
                Ok(_) | Err(RegistryError::Task(_)) => ran += 1,
                Err(e) => debug!(task = %id, reason = %e, "skipped due task"),
            }
        }
        ran
    }

    /// Ids of due, unpaused, idle tasks with an action: high → normal → low,
    /// insertion order within a tier.
    pub async fn due_tasks(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let in_flight: Vec<String> = self.lock_in_flight().keys().cloned().collect();

        let tasks = self.tasks.read().await;
        let mut due: Vec<&Entry> = tasks
            .values()
            .filter(|e| e.handle.is_some())
            .filter(|e| e.descriptor.is_due(now))
            .filter(|e| !in_flight.contains(&e.descriptor.id))
            .collect();
        due.sort_by_key(|e| (e.descriptor.priority.rank(), e.descriptor.seq));
        due.into_iter().map(|e| e.descriptor.id.clone()).collect()
    }

    /// Snapshot of one task.
    pub async fn get_task(&self, id: &str) -> Option<TaskInfo> {
        let running = self.lock_in_flight().contains_key(id);
        let tasks = self.tasks.read().await;
        tasks.get(id).map(|e| TaskInfo {
            descriptor: e.descriptor.clone(),
            has_action: e.handle.is_some(),
            running,
        })
    }

    /// Snapshots of every task, in insertion order.
    pub async fn all_tasks(&self) -> Vec<TaskInfo> {
        let in_flight: Vec<String> = self.lock_in_flight().keys().cloned().collect();
        let tasks = self.tasks.read().await;
        let mut all: Vec<TaskInfo> = tasks
            .values()
            .map(|e| TaskInfo {
                descriptor: e.descriptor.clone(),
                has_action: e.handle.is_some(),
                running: in_flight.contains(&e.descriptor.id),
            })
            .collect();
        all.sort_by_key(|t| t.descriptor.seq);
        all
    }

    /// Number of registered tasks.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Sorted ids of tasks whose action is currently in flight.
    pub fn running_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_in_flight().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Records the service running flag (and config, when given), persists
    /// both and publishes `ServiceStateChanged`.
    pub async fn set_service_running(&self, running: bool, config: Option<ServiceConfig>) {
        let snapshot = {
            let mut state = self.service.write().await;
            state.running = running;
            if config.is_some() {
                state.config = config;
            }
            state.clone()
        };

        self.persist(keys::SERVICE_RUNNING, &snapshot.running).await;
        if let Some(cfg) = &snapshot.config {
            self.persist(keys::SERVICE_CONFIG, cfg).await;
        }
        self.bus
            .publish(Event::new(EventKind::ServiceStateChanged).with_running(running));
    }

    /// Registry-level belief that the service runs.
    pub async fn is_service_running(&self) -> bool {
        self.service.read().await.running
    }

    /// Copy of the service state.
    pub async fn service_state(&self) -> ServiceState {
        self.service.read().await.clone()
    }

    /// Cancels the token of every in-flight action.
    pub fn cancel_running(&self) {
        for guard in self.lock_in_flight().values() {
            guard.token.cancel();
        }
    }

    /// Waits until no action is in flight, at most `grace`.
    ///
    /// Returns the ids still running when the grace period ran out.
    pub async fn wait_idle(&self, grace: Duration) -> Result<(), Vec<String>> {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.lock_in_flight().is_empty() {
                    return;
                }
                notified.await;
            }
        };
        match tokio::time::timeout(grace, drained).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.running_tasks()),
        }
    }

    /// Loads a JSON value from the store.
    pub(crate) async fn load<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, PersistenceError> {
        let raw = self
            .store
            .get(key)
            .await
            .map_err(|error| PersistenceError::Store {
                key: key.into(),
                error,
            })?;
        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|source| PersistenceError::Codec {
                key: key.into(),
                source,
            })
    }

    /// Stores a JSON value; failures are reported, never returned.
    pub(crate) async fn persist<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) {
        let encoded = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(source) => {
                self.report(&PersistenceError::Codec {
                    key: key.into(),
                    source,
                });
                return;
            }
        };
        if let Err(error) = self.store.set(key, encoded).await {
            self.report(&PersistenceError::Store {
                key: key.into(),
                error,
            });
        }
    }

    /// Logs and publishes a persistence failure.
    pub(crate) fn report(&self, err: &PersistenceError) {
        warn!(label = err.as_label(), error = %err, "persistence failed");
        self.bus
            .publish(Event::new(EventKind::PersistenceFailed).with_reason(err.to_string()));
    }

    async fn persist_tasks(&self) {
        let descriptors: Vec<TaskDescriptor> = {
            let tasks = self.tasks.read().await;
            let mut list: Vec<TaskDescriptor> =
                tasks.values().map(|e| e.descriptor.clone()).collect();
            list.sort_by_key(|d| d.seq);
            list
        };
        self.persist(keys::TASKS, &descriptors).await;
    }

    async fn load_descriptors(&self) -> Result<Vec<TaskDescriptor>, PersistenceError> {
        Ok(self.load(keys::TASKS).await?.unwrap_or_default())
    }

    async fn load_service_state(&self) -> Result<ServiceState, PersistenceError> {
        let running = self.load::<bool>(keys::SERVICE_RUNNING).await?;
        let config = self.load::<ServiceConfig>(keys::SERVICE_CONFIG).await?;
        Ok(ServiceState {
            running: running.unwrap_or(false),
            config,
        })
    }

    fn descriptor_from(&self, id: &str, opts: &TaskOptions) -> TaskDescriptor {
        let delay = floor_delay(opts.delay.unwrap_or(Duration::ZERO));
        let loop_delay = floor_delay(opts.loop_delay.unwrap_or(DEFAULT_LOOP_DELAY));
        let timeout = opts
            .timeout
            .or_else(|| self.cfg.default_timeout())
            .unwrap_or(Duration::ZERO);
        let now = self.clock.now_ms();

        TaskDescriptor {
            id: id.to_string(),
            delay_ms: delay.as_millis() as u64,
            loop_delay_ms: loop_delay.as_millis() as u64,
            looping: opts.looping.unwrap_or(false),
            priority: opts.priority.unwrap_or_default(),
            timeout_ms: timeout.as_millis() as u64,
            paused: opts.paused.unwrap_or(false),
            next_execution_time: now.saturating_add(delay.as_millis() as u64),
            created_at: now,
            last_executed_at: None,
            execution_count: 0,
            failure_count: 0,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn generate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("task_{}_{}", self.clock.now_ms(), n)
    }

    /// Applies counters and the loop/one-shot rule. `None` if the task is gone.
    async fn settle(&self, id: &str, ok: bool) -> Option<Settled> {
        let now = self.clock.now_ms();
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(id)?;
        let d = &mut entry.descriptor;
        d.last_executed_at = Some(now);
        if ok {
            d.execution_count += 1;
        } else {
            d.failure_count += 1;
        }

        if d.looping {
            d.next_execution_time = now.saturating_add(d.loop_delay_ms);
            Some(Settled::Rescheduled)
        } else {
            tasks.remove(id);
            Some(Settled::Removed)
        }
    }

    fn enter(&self, id: &str) -> Result<RunGuard, RegistryError> {
        let mut in_flight = self.lock_in_flight();
        if in_flight.contains_key(id) {
            return Err(RegistryError::InvalidTask {
                reason: format!("task '{id}' is already running"),
            });
        }
        let guard = RunGuard {
            token: self.runtime_token.child_token(),
            disarm: CancellationToken::new(),
        };
        let ret = RunGuard {
            token: guard.token.clone(),
            disarm: guard.disarm.clone(),
        };
        in_flight.insert(id.to_string(), guard);
        Ok(ret)
    }

    fn leave(&self, id: &str) {
        self.lock_in_flight().remove(id);
        self.idle.notify_waiters();
    }

    fn disarm(&self, id: &str) {
        if let Some(guard) = self.lock_in_flight().get(id) {
            guard.disarm.cancel();
        }
    }

    fn disarm_all(&self) {
        for guard in self.lock_in_flight().values() {
            guard.disarm.cancel();
        }
    }

    fn publish_removed(&self, id: &str) {
        self.bus
            .publish(Event::new(EventKind::TaskRemoved).with_task(id));
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, RunGuard>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Settled {
    Rescheduled,
    Removed,
}

/// Runs a user callback; a panic is logged and swallowed.
fn guarded_callback(id: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(task = id, "task callback panicked");
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("in_flight", &self.running_tasks())
            .finish_non_exhaustive()
    }
}
