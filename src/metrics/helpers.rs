//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::dispatch::DeliveryReport;
use crate::hub::CloseReason;

use super::{
    CONNECTIONS_TOTAL, HEARTBEAT_DURATION_MS, MESSAGES_DELIVERED_TOTAL, MESSAGES_DROPPED_TOTAL,
    MESSAGES_FAILED_TOTAL, MESSAGES_SENT_TOTAL, STALE_CONNECTIONS_REMOVED, TOPICS_ACTIVE,
    USERS_CONNECTED, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTIONS_REJECTED,
    WS_CONNECTION_DURATION, WS_MESSAGES_RECEIVED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

fn reason_label(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::ClientClosed => "client_closed",
        CloseReason::TransportError => "transport_error",
        CloseReason::AuthorizationMismatch => "authorization_mismatch",
        CloseReason::LimitExceeded => "limit_exceeded",
        CloseReason::SlowConsumer => "slow_consumer",
        CloseReason::Stale => "stale",
        CloseReason::Shutdown => "shutdown",
        CloseReason::Admin => "admin",
    }
}

/// Gauges mirroring the hub's current size
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_snapshot(connections: usize, users: usize, topics: usize) {
        CONNECTIONS_TOTAL.set(connections as i64);
        USERS_CONNECTED.set(users as i64);
        TOPICS_ACTIVE.set(topics as i64);
    }
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    pub fn record_user_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["user"]).inc();
    }

    pub fn record_topic_sent() {
        MESSAGES_SENT_TOTAL.with_label_values(&["topic"]).inc();
    }

    pub fn record_report(report: &DeliveryReport) {
        MESSAGES_DELIVERED_TOTAL.inc_by(report.delivered as u64);
        MESSAGES_DROPPED_TOTAL.inc_by(report.dropped as u64);
        MESSAGES_FAILED_TOTAL.inc_by(report.failed as u64);
    }
}

/// WebSocket lifecycle metrics
pub struct WsMetrics;

impl WsMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(reason: CloseReason, duration_secs: f64) {
        WS_CONNECTIONS_CLOSED
            .with_label_values(&[reason_label(reason)])
            .inc();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_rejected(reason: CloseReason) {
        WS_CONNECTIONS_REJECTED
            .with_label_values(&[reason_label(reason)])
            .inc();
    }
}

/// Helper struct for recording WebSocket message metrics
pub struct WsMessageMetrics;

impl WsMessageMetrics {
    pub fn record_subscribe() {
        WS_MESSAGES_RECEIVED.with_label_values(&["subscribe"]).inc();
    }

    pub fn record_unsubscribe() {
        WS_MESSAGES_RECEIVED
            .with_label_values(&["unsubscribe"])
            .inc();
    }

    pub fn record_ping() {
        WS_MESSAGES_RECEIVED.with_label_values(&["ping"]).inc();
    }

    /// Frames that only count as liveness
    pub fn record_other() {
        WS_MESSAGES_RECEIVED.with_label_values(&["other"]).inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(duration_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }

    pub fn record_stale_removed(count: usize) {
        STALE_CONNECTIONS_REMOVED.inc_by(count as u64);
    }
}
