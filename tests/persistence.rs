use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use taskwarden::{
    ActionFn, ActionRef, Config, DurableStore, EventKind, JsonFileStore, Priority, RegistryError,
    Runtime, RuntimeBuilder, ServiceConfig, TaskOptions, keys,
};

fn file_runtime(path: &std::path::Path) -> Arc<Runtime> {
    RuntimeBuilder::new(Config::default())
        .with_store(Arc::new(JsonFileStore::new(path)) as Arc<dyn DurableStore>)
        .build()
}

fn noop() -> ActionRef {
    ActionFn::arc(|_ctx: CancellationToken| async move { Ok(serde_json::json!("ok")) })
}

#[tokio::test]
async fn tasks_survive_a_restart_paused_and_without_code() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");

    let before = file_runtime(&path);
    assert_ok!(
        before
            .add_task(
                noop(),
                TaskOptions::new()
                    .id("sync")
                    .delay(Duration::from_secs(1))
                    .looping(Duration::from_secs(30))
                    .priority(Priority::High),
            )
            .await
    );
    assert_ok!(before.add_task(noop(), TaskOptions::new().id("report")).await);
    assert_ok!(before.start_service(ServiceConfig::new(2).with_title("Sync")).await);
    assert_ok!(before.shutdown().await);

    let after = file_runtime(&path);
    assert_eq!(after.initialize().await, 2);

    let sync = after.get_task("sync").await.expect("restored");
    assert!(sync.descriptor.paused);
    assert!(!sync.has_action);
    assert!(sync.descriptor.looping);
    assert_eq!(sync.descriptor.priority, Priority::High);
    assert_eq!(sync.descriptor.loop_delay_ms, 30_000);

    let ids: Vec<String> = after
        .all_tasks()
        .await
        .into_iter()
        .map(|t| t.descriptor.id)
        .collect();
    assert_eq!(ids, vec!["sync".to_string(), "report".to_string()]);

    let state = after.registry().service_state().await;
    assert!(state.running);
    assert_eq!(state.config.map(|c| c.id), Some(2));

    let err = assert_err!(after.execute_task("sync").await);
    assert!(matches!(err, RegistryError::InvalidTask { .. }));

    assert_ok!(after.attach_action("sync", noop()).await);
    assert!(after.resume_task("sync").await);
    let sync = after.get_task("sync").await.expect("still there");
    assert!(sync.has_action && !sync.descriptor.paused);
    assert_eq!(assert_ok!(after.execute_task("sync").await), serde_json::json!("ok"));
}

#[tokio::test]
async fn unreadable_state_starts_empty_and_reports_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");
    tokio::fs::write(&path, "not json").await.expect("write");

    let rt = file_runtime(&path);
    let mut rx = rt.bus().subscribe();
    assert_eq!(rt.initialize().await, 0);

    let mut saw_failure = false;
    loop {
        let ev = rx.recv().await.expect("event");
        match ev.kind {
            EventKind::PersistenceFailed => saw_failure = true,
            EventKind::Restored => {
                assert!(ev.reason.is_some());
                break;
            }
            _ => {}
        }
    }
    assert!(saw_failure);
    assert_eq!(rt.status().await.task_count, 0);
}

#[tokio::test]
async fn auto_restart_flag_is_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state.json");

    let rt = file_runtime(&path);
    assert!(!rt.auto_restart().await);
    rt.set_auto_restart(true).await;

    let store = JsonFileStore::new(&path);
    let raw = assert_ok!(store.get(keys::AUTO_RESTART).await);
    assert_eq!(raw.as_deref(), Some("true"));
    assert!(file_runtime(&path).auto_restart().await);
}
