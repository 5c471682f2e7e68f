//! Prometheus metrics for the realtime hub.
//!
//! - Connection metrics (open connections, users, topics)
//! - WebSocket lifecycle metrics (opened, closed by reason, rejected, duration)
//! - Message metrics (sent by target, delivered, dropped, failed)
//! - Heartbeat metrics

mod helpers;

pub use helpers::{
    encode_metrics, ConnectionMetrics, HeartbeatMetrics, MessageMetrics, WsMessageMetrics,
    WsMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "scan_hub";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of open connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Number of open WebSocket connections"
    ).unwrap();

    /// Number of users with at least one open connection
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of users with at least one open connection"
    ).unwrap();

    /// Topics with at least one subscriber
    pub static ref TOPICS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_topics_active", METRIC_PREFIX),
        "Number of topics with at least one subscriber"
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Messages sent by target type
    pub static ref MESSAGES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_sent_total", METRIC_PREFIX),
        "Total messages sent",
        &["target"]
    ).unwrap();

    /// Messages enqueued to connections
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages enqueued to connections"
    ).unwrap();

    /// Messages dropped on a full outbound queue
    pub static ref MESSAGES_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_dropped_total", METRIC_PREFIX),
        "Total messages dropped because an outbound queue was full"
    ).unwrap();

    /// Messages not delivered because the transport was gone
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total message delivery failures on dead connections"
    ).unwrap();

    // ============================================================================
    // WebSocket Metrics
    // ============================================================================

    /// WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// WebSocket connections closed, by reason
    pub static ref WS_CONNECTIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed",
        &["reason"]
    ).unwrap();

    /// WebSocket connections rejected at admission, by reason
    pub static ref WS_CONNECTIONS_REJECTED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_connections_rejected_total", METRIC_PREFIX),
        "Total WebSocket connections rejected at admission",
        &["reason"]
    ).unwrap();

    /// WebSocket messages received from clients
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Total WebSocket messages received from clients",
        &["type"]
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
    ).unwrap();

    /// Connections removed for missing liveness signals
    pub static ref STALE_CONNECTIONS_REMOVED: IntCounter = register_int_counter!(
        format!("{}_stale_connections_removed_total", METRIC_PREFIX),
        "Total connections closed for missing liveness signals"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // lazy_static registers on first access
        CONNECTIONS_TOTAL.set(1);

        let output = encode_metrics().unwrap();
        assert!(output.contains("scan_hub_connections_total"));
    }

    #[test]
    fn test_websocket_metrics() {
        WS_CONNECTIONS_OPENED.inc();
        WS_CONNECTIONS_CLOSED.with_label_values(&["client_closed"]).inc();
        WS_CONNECTION_DURATION.observe(12.0);
        // Just verify no panics
    }
}
