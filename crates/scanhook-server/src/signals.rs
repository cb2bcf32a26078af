//! Double-signal shutdown: the first SIGINT/SIGTERM cancels the process
//! context; a second forces immediate exit.

use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Spawns a task watching for interrupt/terminate signals. Returns a token
/// that is cancelled on the first signal; a second signal calls
/// `std::process::exit(1)` directly, bypassing graceful shutdown.
pub fn install(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, cancelling");
        token.cancel();

        wait_for_signal().await;
        tracing::warn!("second shutdown signal received, forcing exit");
        std::process::exit(1);
    });
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
