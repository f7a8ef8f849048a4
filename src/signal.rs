//! Signal handling for cooperative cancellation of a pipeline run.

use tracing::{info, warn};

/// Wait for a shutdown signal (SIGINT, SIGTERM, or SIGQUIT on Unix).
///
/// If the handlers cannot be installed the future never completes, so the
/// run proceeds without signal-driven cancellation.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    let install = |kind: SignalKind, name: &str| -> Option<Signal> {
        match signal(kind) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(signal = name, error = %e, "Failed to install signal handler");
                None
            }
        }
    };

    let (Some(mut sigint), Some(mut sigterm), Some(mut sigquit)) = (
        install(SignalKind::interrupt(), "SIGINT"),
        install(SignalKind::terminate(), "SIGTERM"),
        install(SignalKind::quit(), "SIGQUIT"),
    ) else {
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => {
            info!(message = "Signal received.", signal = "SIGINT");
        }
        _ = sigterm.recv() => {
            info!(message = "Signal received.", signal = "SIGTERM");
        }
        _ = sigquit.recv() => {
            info!(message = "Signal received.", signal = "SIGQUIT");
        }
    }
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(message = "Signal received.", signal = "Ctrl-C"),
        Err(e) => {
            warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await
        }
    }
}
