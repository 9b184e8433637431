//! # Process termination signals.
//!
//! [`wait_for_shutdown_signal`] completes when the process is asked to stop.
//! [`Runtime::run_until_shutdown`](crate::Runtime::run_until_shutdown) awaits
//! it before draining the scheduler, the recovery monitor and in-flight
//! actions.
//!
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT` (plus Ctrl-C).
//! **Elsewhere:** Ctrl-C via [`tokio::signal::ctrl_c`].

/// Waits for a termination signal.
///
/// Each call installs its own listeners. `Err` means a listener could not be
/// registered.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for a termination signal.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
