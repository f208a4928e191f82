//! SIGINT/SIGTERM handling for the example server.

use rpc_utils::{StopHandle, logger};
use std::io;
use std::thread;

/// Stop the server behind `stop` when the process receives SIGINT or
/// SIGTERM (Ctrl+C on other platforms).
///
/// The watcher runs on its own thread so it works with both the blocking and
/// the background run modes.
///
/// # Errors
///
/// Returns an error if the watcher thread or its runtime cannot be started.
pub fn stop_on_signal(stop: StopHandle) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                wait_for_shutdown_signal().await;
                logger::info("Received shutdown signal, stopping server...");
                stop.stop();
            });
        })?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => logger::debug("Received SIGTERM"),
                _ = sigint.recv() => logger::debug("Received SIGINT"),
            }
        }
        _ => {
            logger::warning("Could not install SIGTERM/SIGINT handlers, falling back to Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
