//! Turns SIGINT and SIGTERM into cancellation of the backup cycle.
//!
//! With the handlers installed the signals no longer terminate the process.
//! The orchestrator notices the cancelled token at its next safe point,
//! releases the slave mount and still requests deletion of its snapshots.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Spawns a task that cancels `token` on the first SIGINT or SIGTERM.
///
/// The task also ends when `token` is cancelled by other means.
#[must_use]
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            signal_name = wait_for_signal() => {
                warn!(signal = signal_name, "interrupt received; finishing cleanup before exit");
                token.cancel();
            }
        }
    })
}

async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_stops_when_token_is_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let handle = spawn_signal_listener(token.clone());

        token.cancel();

        handle.await.expect("listener should finish cleanly");
        assert!(token.is_cancelled());
    }
}
