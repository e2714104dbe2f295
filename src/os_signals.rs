//! Termination signal handling.
//!
//! SIGINT and SIGTERM both end the supervision loop. The signal path never
//! touches the child processes itself, it only cancels the token the
//! [`Supervisor`](crate::supervisor::Supervisor) watches.

use log::{error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Completes when the process receives SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv()  => { info!("SIGINT received"); },
        _ = sigterm.recv() => { info!("SIGTERM received"); },
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Cancels `token` once a termination signal arrives
pub fn spawn_signal_watcher(token: CancellationToken) -> JoinHandle<()> {
    return tokio::spawn(async move {
        tokio::select! {
            r = wait_for_shutdown_signal() => {
                if let Err(e) = r {
                    error!("Unable to listen for termination signals: {e}");
                    return;
                }
                token.cancel();
            },
            _ = token.cancelled() => {},
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watcher_ends_with_token() {
        let token = CancellationToken::new();
        let watcher = spawn_signal_watcher(token.clone());

        token.cancel();
        let done = tokio::time::timeout(Duration::from_secs(1), watcher).await;
        assert!(done.is_ok());
    }
}
