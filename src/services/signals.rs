use crate::services::ServiceManager;
use crate::utils::fmt_duration;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Run until a signal arrives or a service exits, then shut everything down.
///
/// Services get `shutdown_timeout` to drain; exceeding it yields a failure
/// exit code, as does any service stopping on its own with an error.
pub async fn handle_shutdown_signals(
    mut service_manager: ServiceManager,
    shutdown_timeout: Duration,
) -> ExitCode {
    let mut exit_code = ExitCode::SUCCESS;

    tokio::select! {
        _ = shutdown_signal() => {}
        exit = service_manager.next_exit() => match exit {
            Some((name, Ok(()))) => warn!(service = name, "Service exited unexpectedly"),
            Some((name, Err(e))) => {
                error!(service = name, error = ?e, "Service failed");
                exit_code = ExitCode::FAILURE;
            }
            None => warn!("No services running"),
        },
    }

    info!(
        timeout = fmt_duration(shutdown_timeout),
        "Shutting down, draining in-flight requests"
    );
    let start = Instant::now();

    match tokio::time::timeout(shutdown_timeout, service_manager.shutdown()).await {
        Ok(true) => {
            info!(
                duration = fmt_duration(start.elapsed()),
                "Graceful shutdown complete"
            );
            exit_code
        }
        Ok(false) => {
            warn!(
                duration = fmt_duration(start.elapsed()),
                "Shutdown finished with errors"
            );
            ExitCode::FAILURE
        }
        Err(_) => {
            error!(
                timeout = fmt_duration(shutdown_timeout),
                "Graceful shutdown timed out"
            );
            ExitCode::FAILURE
        }
    }
}
