//! # Run a single invocation of a task action.
//!
//! Races one invocation of an [`Action`] against its timeout and reports the
//! winner. Bookkeeping (counters, reschedule, callbacks) belongs to the
//! registry; this module only decides *what happened*.
//!
//! ## Race
//!
//! ```text
//! action.spawn(token) ──► tokio::spawn ──► JoinHandle ─┐
//!                                                      ├─ select! ─► first to settle wins
//! sleep(timeout) unless disarm.cancelled() ────────────┘
//!
//! Action wins:      Ok(value) | Err(Fail/Canceled)      (panic → Fail)
//! Timer wins:       token.cancel() → publish TimeoutHit → Err(Timeout)
//!                   the action is detached, not aborted
//! Timer disarmed:   keep waiting for the action (pause/remove during a run)
//! ```
//!
//! ## Rules
//! - Exactly one outcome per invocation; a late action result after a timeout
//!   is dropped with the detached task.
//! - The per-invocation token is cancelled on timeout so cooperative actions
//!   can stop early; nothing is ever force-killed.
//! - `TimeoutHit` is published **in addition to** the registry's `TaskError`.

use std::time::Duration;

use tokio::task::JoinError;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::{
    error::TaskError,
    events::{Bus, Event, EventKind},
    tasks::{Action, ActionResult},
};

/// Executes one invocation of `action`, racing it against `timeout`.
///
/// ### Parameters
/// - `token`: handed to the action; cancelled when the timer wins
/// - `timeout`: `None` or zero → wait for the action indefinitely
/// - `disarm`: cancelling it stops the timer without touching the action
///
/// ### Panics
/// A panicking action is reported as [`TaskError::Fail`]; the panic never
/// reaches the caller.
pub async fn run_once<A: Action + ?Sized>(
    action: &A,
    task_id: &str,
    token: CancellationToken,
    timeout: Option<Duration>,
    disarm: &CancellationToken,
    bus: &Bus,
) -> ActionResult {
    let mut join = tokio::spawn(action.spawn(token.clone()));

    let Some(dur) = timeout.filter(|d| *d > Duration::ZERO) else {
        return joined(join.await);
    };

    tokio::select! {
        biased;
        res = &mut join => joined(res),
        fired = armed_timer(dur, disarm) => {
            if fired {
                token.cancel();
                publish_timeout(bus, task_id, dur);
                Err(TaskError::Timeout { timeout: dur })
            } else {
                joined(join.await)
            }
        }
    }
}

/// Resolves to `true` when `dur` elapses, `false` when disarmed first.
async fn armed_timer(dur: Duration, disarm: &CancellationToken) -> bool {
    tokio::select! {
        _ = time::sleep(dur) => true,
        _ = disarm.cancelled() => false,
    }
}

fn joined(res: Result<ActionResult, JoinError>) -> ActionResult {
    match res {
        Ok(r) => r,
        Err(e) if e.is_panic() => Err(TaskError::fail(format!(
            "action panicked: {}",
            panic_message(e.into_panic())
        ))),
        Err(_) => Err(TaskError::Canceled),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Publishes `TimeoutHit` event (always followed by `TaskError`).
fn publish_timeout(bus: &Bus, task_id: &str, dur: Duration) {
    bus.publish(
        Event::new(EventKind::TimeoutHit)
            .with_task(task_id)
            .with_timeout(dur),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::ActionFn;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sleeper(ms: u64) -> impl Action {
        ActionFn::new(move |_ctx: CancellationToken| async move {
            time::sleep(Duration::from_millis(ms)).await;
            Ok(serde_json::json!(ms))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn action_wins_the_race() {
        let bus = Bus::new(8);
        let res = run_once(
            &sleeper(50),
            "fast",
            CancellationToken::new(),
            Some(Duration::from_millis(100)),
            &CancellationToken::new(),
            &bus,
        )
        .await;
        assert_eq!(res, Ok(serde_json::json!(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_wins_and_cancels_the_token() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let token = CancellationToken::new();
        let res = run_once(
            &sleeper(200),
            "slow",
            token.clone(),
            Some(Duration::from_millis(100)),
            &CancellationToken::new(),
            &bus,
        )
        .await;

        assert_eq!(
            res,
            Err(TaskError::Timeout {
                timeout: Duration::from_millis(100)
            })
        );
        assert!(token.is_cancelled());
        let ev = rx.recv().await.expect("timeout event");
        assert_eq!(ev.kind, EventKind::TimeoutHit);
        assert_eq!(ev.timeout_ms, Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_action_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let f = Arc::clone(&finished);
        let action = ActionFn::new(move |_ctx: CancellationToken| {
            let f = Arc::clone(&f);
            async move {
                time::sleep(Duration::from_millis(200)).await;
                f.store(true, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }
        });

        let res = run_once(
            &action,
            "detached",
            CancellationToken::new(),
            Some(Duration::from_millis(100)),
            &CancellationToken::new(),
            &Bus::new(8),
        )
        .await;
        assert!(res.is_err_and(|e| e.is_timeout()));
        assert!(!finished.load(Ordering::SeqCst));

        time::sleep(Duration::from_millis(150)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_timer_never_fires() {
        let disarm = CancellationToken::new();
        disarm.cancel();
        let res = run_once(
            &sleeper(300),
            "paused",
            CancellationToken::new(),
            Some(Duration::from_millis(100)),
            &disarm,
            &Bus::new(8),
        )
        .await;
        assert_eq!(res, Ok(serde_json::json!(300)));
    }

    #[tokio::test]
    async fn panic_is_reported_as_failure() {
        let action = ActionFn::new(|_ctx: CancellationToken| async move {
            if true {
                panic!("kaboom");
            }
            Ok(serde_json::Value::Null)
        });
        let res = run_once(
            &action,
            "panicky",
            CancellationToken::new(),
            None,
            &CancellationToken::new(),
            &Bus::new(8),
        )
        .await;
        assert_eq!(res, Err(TaskError::fail("action panicked: kaboom")));
    }
}
