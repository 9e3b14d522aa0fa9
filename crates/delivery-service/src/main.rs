//! Delivery service entry point.

use delivery_service::{Config, telemetry};
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), delivery_service::ServiceError> {
    // 1. Load configuration
    let config = Config::from_env()?;

    // 2. Initialize tracing
    telemetry::init_tracing(&config);
    tracing::info!(
        backend = ?config.store_backend,
        log_format = ?config.log_format,
        "starting delivery service"
    );

    // 3. Build stores, catch up the read model and project until shutdown
    let result = delivery_service::run(&config, shutdown_signal()).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "delivery service failed");
    }
    result
}
