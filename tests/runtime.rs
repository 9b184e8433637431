use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::time;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use taskwarden::{
    ActionFn, ActionRef, Clock, Config, DurableStore, Event, EventKind, ExecutionHost, HostEvent,
    MemoryStore, RecoveryPhase, Runtime, RuntimeBuilder, RuntimeError, ServiceConfig, ServiceError,
    Subscribe, TaskOptions,
};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[derive(Default)]
struct MockHost {
    running: AtomicBool,
    refuse_stop: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    updates: AtomicUsize,
    last: Mutex<Option<ServiceConfig>>,
}

#[async_trait]
impl ExecutionHost for MockHost {
    async fn start_service(&self, config: &ServiceConfig) -> Result<(), ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    async fn update_service(&self, _config: &ServiceConfig) -> Result<(), ServiceError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_service(&self) -> Result<(), ServiceError> {
        if self.refuse_stop.load(Ordering::SeqCst) {
            return Err(ServiceError::host("busy"));
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_service_running(&self) -> Result<bool, ServiceError> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn restart_service(&self, config: &ServiceConfig) -> Result<(), ServiceError> {
        self.start_service(config).await
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<EventKind>>);

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.0.lock().unwrap().push(event.kind);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

fn runtime_with(host: &Arc<MockHost>, store: &Arc<MemoryStore>) -> Arc<Runtime> {
    RuntimeBuilder::new(Config::default())
        .with_host(Arc::clone(host) as Arc<dyn ExecutionHost>)
        .with_store(Arc::clone(store) as Arc<dyn DurableStore>)
        .build()
}

fn counting_action(hits: &Arc<AtomicUsize>) -> ActionRef {
    let hits = Arc::clone(hits);
    ActionFn::arc(move |_ctx: CancellationToken| {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::Value::Null)
        }
    })
}

#[tokio::test(start_paused = true)]
async fn start_service_rejects_zero_id() {
    let host = Arc::new(MockHost::default());
    let rt = runtime_with(&host, &Arc::new(MemoryStore::new()));

    let err = assert_err!(rt.start_service(ServiceConfig::new(0)).await);
    assert_eq!(err.as_label(), "service_invalid_config");
    assert_eq!(host.starts.load(Ordering::SeqCst), 0);
    assert!(!rt.status().await.service_running);
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_drive_host_scheduler_and_recovery() {
    let host = Arc::new(MockHost::default());
    let rt = runtime_with(&host, &Arc::new(MemoryStore::new()));

    assert_ok!(rt.start_service(ServiceConfig::new(3).with_title("Sync")).await);
    let status = rt.status().await;
    assert!(status.service_running);
    assert!(status.scheduler.running);
    assert!(status.recovery.monitoring);
    assert_eq!(host.starts.load(Ordering::SeqCst), 1);

    assert_ok!(rt.stop_service().await);
    let status = rt.status().await;
    assert!(!status.service_running);
    assert!(!status.scheduler.running);
    assert_eq!(status.recovery.phase, RecoveryPhase::Idle);
    assert_eq!(host.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn refused_stop_keeps_the_service_monitored() {
    let host = Arc::new(MockHost::default());
    let rt = runtime_with(&host, &Arc::new(MemoryStore::new()));
    assert_ok!(rt.start_service(ServiceConfig::new(3)).await);

    host.refuse_stop.store(true, Ordering::SeqCst);
    assert_err!(rt.stop_service().await);

    let status = rt.status().await;
    assert!(status.service_running);
    assert!(status.scheduler.running);
    assert!(status.recovery.monitoring);
}

#[tokio::test(start_paused = true)]
async fn auto_restart_uses_the_last_start_config() {
    let store = Arc::new(MemoryStore::new());

    let first_host = Arc::new(MockHost::default());
    let first = runtime_with(&first_host, &store);
    assert_ok!(first.start_service(ServiceConfig::new(7).with_title("Backup")).await);
    first.set_auto_restart(true).await;
    assert_ok!(first.shutdown().await);

    let second_host = Arc::new(MockHost::default());
    let second = runtime_with(&second_host, &store);
    assert!(second.auto_restart().await);
    second.initialize().await;

    assert_eq!(second_host.starts.load(Ordering::SeqCst), 1);
    let restarted = second_host.last.lock().unwrap().clone();
    assert_eq!(restarted.map(|c| (c.id, c.title)), Some((7, "Backup".to_string())));
    assert!(second.status().await.service_running);
}

#[tokio::test(start_paused = true)]
async fn auto_restart_off_leaves_the_service_stopped() {
    let store = Arc::new(MemoryStore::new());
    let first = runtime_with(&Arc::new(MockHost::default()), &store);
    assert_ok!(first.start_service(ServiceConfig::new(7)).await);
    assert_ok!(first.shutdown().await);

    let host = Arc::new(MockHost::default());
    let second = runtime_with(&host, &store);
    second.initialize().await;
    assert_eq!(host.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn update_service_merges_into_the_last_config() {
    let host = Arc::new(MockHost::default());
    let rt = runtime_with(&host, &Arc::new(MemoryStore::new()));
    assert_ok!(
        rt.start_service(ServiceConfig::new(1).with_title("A").with_message("first"))
            .await
    );

    assert_ok!(rt.update_service(ServiceConfig::new(1).with_message("second")).await);

    assert_eq!(host.updates.load(Ordering::SeqCst), 1);
    let state = rt.registry().service_state().await;
    let cfg = state.config.expect("service config");
    assert_eq!(cfg.title, "A");
    assert_eq!(cfg.message, "second");
}

#[tokio::test(start_paused = true)]
async fn scheduler_runs_due_tasks_once_the_service_is_up() {
    let host = Arc::new(MockHost::default());
    let rt = runtime_with(&host, &Arc::new(MemoryStore::new()));
    let hits = Arc::new(AtomicUsize::new(0));
    assert_ok!(
        rt.add_task(counting_action(&hits), TaskOptions::new().id("once"))
            .await
    );

    time::sleep(ms(2_000)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    assert_ok!(rt.start_service(ServiceConfig::new(1)).await);
    time::sleep(ms(600)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(rt.get_task("once").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn task_runner_executes_due_tasks_without_the_scheduler() {
    let rt = RuntimeBuilder::new(Config::default())
        .with_clock(Clock::starting_at(1_000_000))
        .build();
    let hits = Arc::new(AtomicUsize::new(0));
    for id in ["a", "b"] {
        assert_ok!(
            rt.add_task(counting_action(&hits), TaskOptions::new().id(id).delay(ms(100)))
                .await
        );
    }
    assert_eq!(rt.execute_task_runner().await, 0);

    time::advance(ms(150)).await;
    assert_eq!(rt.execute_task_runner().await, 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(rt.status().await.task_count, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_reports_actions_that_outlive_the_grace() {
    let rt = RuntimeBuilder::new(Config {
        grace: Duration::from_secs(1),
        ..Config::default()
    })
    .build();
    let stubborn: ActionRef = ActionFn::arc(|_ctx: CancellationToken| async move {
        time::sleep(Duration::from_secs(3600)).await;
        Ok(serde_json::Value::Null)
    });
    assert_ok!(
        rt.add_task(stubborn, TaskOptions::new().id("stubborn"))
            .await
    );

    let runner = Arc::clone(&rt);
    let exec = tokio::spawn(async move { runner.execute_task("stubborn").await });
    time::sleep(ms(10)).await;
    assert_eq!(rt.registry().running_tasks(), vec!["stubborn".to_string()]);

    match rt.shutdown().await {
        Err(RuntimeError::GraceExceeded { grace, stuck }) => {
            assert_eq!(grace, Duration::from_secs(1));
            assert_eq!(stuck, vec!["stubborn".to_string()]);
        }
        other => panic!("expected grace exceeded, got {other:?}"),
    }
    exec.abort();
}

#[tokio::test(start_paused = true)]
async fn cooperative_actions_stop_within_the_grace() {
    let rt = RuntimeBuilder::new(Config::default()).build();
    let polite: ActionRef = ActionFn::arc(|ctx: CancellationToken| async move {
        ctx.cancelled().await;
        Err(taskwarden::TaskError::Canceled)
    });
    assert_ok!(rt.add_task(polite, TaskOptions::new().id("polite")).await);

    let runner = Arc::clone(&rt);
    let exec = tokio::spawn(async move { runner.execute_task("polite").await });
    time::sleep(ms(10)).await;

    assert_ok!(rt.shutdown().await);
    let res = exec.await.expect("join");
    assert_eq!(res.map_err(|e| e.as_label()), Err("task_canceled"));
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_events_up_to_shutdown() {
    let recorder = Arc::new(Recorder::default());
    let rt = RuntimeBuilder::new(Config::default())
        .with_subscribers(vec![Arc::clone(&recorder) as Arc<dyn Subscribe>])
        .build();

    let hits = Arc::new(AtomicUsize::new(0));
    assert_ok!(rt.add_task(counting_action(&hits), TaskOptions::new().id("t")).await);
    assert_ok!(rt.shutdown().await);

    let seen = recorder.0.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            EventKind::TaskAdded,
            EventKind::ShutdownRequested,
            EventKind::AllStoppedWithin
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn removing_user_listeners_keeps_internal_ones() {
    let rt = RuntimeBuilder::new(Config::default()).build();
    let added = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&added);
    rt.add_event_listener(EventKind::TaskAdded, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let removed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&removed);
    let on_removed = rt.add_event_listener(EventKind::TaskRemoved, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let hits = Arc::new(AtomicUsize::new(0));
    assert_ok!(rt.add_task(counting_action(&hits), TaskOptions::new().id("a")).await);
    assert!(on_removed.unsubscribe());
    assert!(rt.remove_task("a").await);
    assert_eq!(removed.load(Ordering::SeqCst), 0);

    assert_eq!(rt.remove_all_event_listeners(), 1);
    assert_ok!(rt.add_task(counting_action(&hits), TaskOptions::new().id("b")).await);
    assert_eq!(added.load(Ordering::SeqCst), 1);

    // Recovery still tracks service state changes.
    rt.registry().set_service_running(true, None).await;
    let last = rt.status().await.recovery.last_service_state;
    assert_eq!(last.map(|s| s.running), Some(true));
}

#[tokio::test(start_paused = true)]
async fn host_restart_notification_marks_the_service_running() {
    let host = Arc::new(MockHost::default());
    let rt = runtime_with(&host, &Arc::new(MemoryStore::new()));
    assert!(!rt.status().await.service_running);

    rt.handle_host_event(HostEvent::ServiceRestarted {
        config: Some(ServiceConfig::new(4)),
    })
    .await;

    assert!(rt.status().await.service_running);
    let cfg = rt.registry().service_state().await.config;
    assert_eq!(cfg.map(|c| c.id), Some(4));
}
