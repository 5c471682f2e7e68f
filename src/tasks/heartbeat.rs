use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::dispatch::Dispatcher;
use crate::metrics::HeartbeatMetrics;
use crate::websocket::ServerMessage;

/// Background task for heartbeat and stale connection cleanup
pub struct HeartbeatTask {
    config: WebSocketConfig,
    dispatcher: Arc<Dispatcher>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        dispatcher: Arc<Dispatcher>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            shutdown,
        }
    }

    /// Run until the shutdown broadcast fires
    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval.max(1));
        let connection_timeout = Duration::from_secs(self.config.connection_timeout);

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = self.config.connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats();
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Enqueue a heartbeat frame to every open connection.
    ///
    /// Goes through the dispatcher, so a full queue is handled by the same
    /// overflow policy as any other message.
    fn send_heartbeats(&self) {
        let start = Instant::now();
        let report = self.dispatcher.broadcast_control(ServerMessage::Heartbeat);
        if report.targets() == 0 {
            return;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);

        tracing::debug!(
            delivered = report.delivered,
            dropped = report.dropped,
            failed = report.failed,
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );
    }

    fn cleanup_stale_connections(&self, timeout: Duration) {
        let removed = self.dispatcher.hub().cleanup_stale_connections(timeout);

        if removed > 0 {
            HeartbeatMetrics::record_stale_removed(removed);
            tracing::info!(
                removed = removed,
                timeout_secs = timeout.as_secs(),
                "Cleaned up stale connections"
            );
        }
    }
}
