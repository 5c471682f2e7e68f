use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use scan_realtime_service::config::Settings;
use scan_realtime_service::hub::{CloseReason, RealtimeHub};
use scan_realtime_service::server::{create_app, AppState};
use scan_realtime_service::tasks::HeartbeatTask;
use scan_realtime_service::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("Failed to load configuration")?;

    telemetry::init_tracing(&settings.logging)?;
    tracing::info!("Configuration loaded");

    let state = AppState::new(settings.clone());
    tracing::info!(
        outbound_queue_capacity = settings.hub.outbound_queue_capacity,
        overflow_policy = ?settings.hub.overflow_policy,
        "Hub initialized"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let heartbeat_task = HeartbeatTask::new(
        settings.websocket.clone(),
        state.dispatcher.clone(),
        shutdown_tx.subscribe(),
    );
    let heartbeat_handle = tokio::spawn(async move {
        heartbeat_task.run().await;
    });

    let hub = state.hub.clone();
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx, hub))
        .await?;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = heartbeat_handle.await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>, hub: Arc<RealtimeHub>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    let _ = shutdown_tx.send(());

    // Open sockets would otherwise keep the graceful drain waiting forever
    let closed = hub.disconnect_all(CloseReason::Shutdown);
    tracing::info!(closed = closed, "Closed all connections");
}
