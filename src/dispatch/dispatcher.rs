use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::hub::{
    CloseReason, Connection, ConnectionState, EnqueueError, OverflowPolicy, RealtimeHub,
};
use crate::metrics::MessageMetrics;
use crate::websocket::{OutboundMessage, Payload, ServerMessage};

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Connections the message was enqueued to
    pub delivered: usize,
    /// Connections skipped because their outbound queue was full
    pub dropped: usize,
    /// Connections whose transport was already gone
    pub failed: usize,
}

impl DeliveryReport {
    pub fn targets(&self) -> usize {
        self.delivered + self.dropped + self.failed
    }

    pub fn success(&self) -> bool {
        self.delivered > 0
    }
}

/// Counters for the dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub total_sent: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_dropped: AtomicU64,
    pub total_failed: AtomicU64,
    pub user_messages: AtomicU64,
    pub topic_messages: AtomicU64,
}

impl DispatcherStats {
    fn record(&self, report: &DeliveryReport) {
        self.total_sent.fetch_add(1, Ordering::Relaxed);
        self.total_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.total_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.total_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            user_messages: self.user_messages.load(Ordering::Relaxed),
            topic_messages: self.topic_messages.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_dropped: u64,
    pub total_failed: u64,
    pub user_messages: u64,
    pub topic_messages: u64,
}

/// Single outbound path for everything written to client connections.
///
/// Delivery never waits for queue space: a full queue is handled by the hub's
/// overflow policy, so one slow consumer cannot hold up the rest of a fan-out.
pub struct Dispatcher {
    hub: Arc<RealtimeHub>,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(hub: Arc<RealtimeHub>) -> Self {
        Self {
            hub,
            stats: DispatcherStats::default(),
        }
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Enqueue a payload to every open connection of a user
    #[tracing::instrument(name = "dispatcher.send_to_user", skip(self, payload), fields(bytes = payload.len()))]
    pub fn send_to_user(&self, user_id: &str, payload: Payload) -> DeliveryReport {
        let connections = self.hub.list_connections(user_id);
        let report = self.fan_out(&connections, &OutboundMessage::Payload(payload));

        self.stats.record(&report);
        self.stats.user_messages.fetch_add(1, Ordering::Relaxed);
        MessageMetrics::record_user_sent();
        MessageMetrics::record_report(&report);

        tracing::debug!(
            user_id = %user_id,
            delivered = report.delivered,
            dropped = report.dropped,
            failed = report.failed,
            "Sent message to user"
        );
        report
    }

    /// Enqueue a payload to every current subscriber of a topic
    #[tracing::instrument(name = "dispatcher.publish_to_topic", skip(self, payload), fields(bytes = payload.len()))]
    pub fn publish_to_topic(&self, topic: &str, payload: Payload) -> DeliveryReport {
        let connections = self.hub.subscribers_of(topic);
        let report = self.fan_out(&connections, &OutboundMessage::Payload(payload));

        self.stats.record(&report);
        self.stats.topic_messages.fetch_add(1, Ordering::Relaxed);
        MessageMetrics::record_topic_sent();
        MessageMetrics::record_report(&report);

        tracing::debug!(
            topic = %topic,
            delivered = report.delivered,
            dropped = report.dropped,
            failed = report.failed,
            "Published message to topic"
        );
        report
    }

    /// Reply to one connection with a control frame
    pub fn send_control(&self, connection: &Arc<Connection>, message: ServerMessage) -> bool {
        let report = self.fan_out(std::slice::from_ref(connection), &message.into());
        report.delivered == 1
    }

    /// Enqueue a control frame to every open connection
    pub fn broadcast_control(&self, message: ServerMessage) -> DeliveryReport {
        let connections = self.hub.all_connections();
        self.fan_out(&connections, &message.into())
    }

    /// Hand a message to each target's outbound queue.
    ///
    /// A dead transport triggers that connection's disconnect cleanup; an
    /// overflowing queue is handled per the configured policy. Neither stops
    /// delivery to the remaining targets.
    fn fan_out(&self, connections: &[Arc<Connection>], message: &OutboundMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for conn in connections {
            match conn.try_enqueue(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(EnqueueError::Full) => {
                    report.dropped += 1;
                    match self.hub.options().overflow_policy {
                        OverflowPolicy::DropNewest => {
                            tracing::debug!(
                                connection_id = %conn.id,
                                "Outbound queue full, message dropped"
                            );
                        }
                        OverflowPolicy::Disconnect => {
                            tracing::warn!(
                                connection_id = %conn.id,
                                user_id = %conn.user_id,
                                "Outbound queue full, disconnecting slow consumer"
                            );
                            self.hub.force_disconnect(conn, CloseReason::SlowConsumer);
                        }
                    }
                }
                // Closed normally after the target list was taken
                Err(EnqueueError::Closed) if conn.state() == ConnectionState::Closed => {
                    tracing::trace!(connection_id = %conn.id, "Skipping closed connection");
                }
                Err(EnqueueError::Closed) => {
                    report.failed += 1;
                    tracing::debug!(
                        connection_id = %conn.id,
                        "Connection transport gone, running disconnect cleanup"
                    );
                    self.hub.on_disconnect(conn, CloseReason::TransportError);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubOptions;

    fn dispatcher(capacity: usize, policy: OverflowPolicy) -> Dispatcher {
        let hub = Arc::new(RealtimeHub::new(HubOptions {
            outbound_queue_capacity: capacity,
            overflow_policy: policy,
            ..HubOptions::default()
        }));
        Dispatcher::new(hub)
    }

    #[test]
    fn test_delivery_report() {
        let report = DeliveryReport {
            delivered: 2,
            dropped: 1,
            failed: 1,
        };
        assert!(report.success());
        assert_eq!(report.targets(), 4);
        assert!(!DeliveryReport::default().success());
    }

    #[test]
    fn test_send_to_user_reaches_all_connections() {
        let dispatcher = dispatcher(8, OverflowPolicy::Disconnect);
        let hub = dispatcher.hub().clone();
        let mut a = hub.on_connect("42", "42").unwrap();
        let mut b = hub.on_connect("42", "42").unwrap();
        let mut other = hub.on_connect("7", "7").unwrap();

        let report = dispatcher.send_to_user("42", Payload::from("hello"));
        assert_eq!(report.delivered, 2);

        assert_eq!(a.outbound.try_recv().unwrap(), OutboundMessage::from("hello"));
        assert_eq!(b.outbound.try_recv().unwrap(), OutboundMessage::from("hello"));
        assert!(other.outbound.try_recv().is_err());
    }

    #[test]
    fn test_dead_connection_is_cleaned_up_and_rest_delivered() {
        let dispatcher = dispatcher(8, OverflowPolicy::Disconnect);
        let hub = dispatcher.hub().clone();
        let dead = hub.on_connect("42", "42").unwrap();
        let mut live = hub.on_connect("42", "42").unwrap();
        hub.subscribe(&dead.connection, "scan-1").unwrap();
        hub.subscribe(&live.connection, "scan-1").unwrap();

        let dead_conn = dead.connection.clone();
        drop(dead.outbound);

        let report = dispatcher.publish_to_topic("scan-1", Payload::from("progress"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(live.outbound.try_recv().unwrap(), OutboundMessage::from("progress"));

        assert_eq!(dead_conn.state(), ConnectionState::Closed);
        assert_eq!(dead_conn.close_reason(), Some(CloseReason::TransportError));
        assert_eq!(hub.count_connections("42"), 1);
        assert_eq!(hub.subscribers_of("scan-1").len(), 1);
    }

    #[test]
    fn test_target_closed_after_snapshot_is_not_a_failure() {
        let dispatcher = dispatcher(8, OverflowPolicy::Disconnect);
        let hub = dispatcher.hub().clone();
        let gone = hub.on_connect("42", "42").unwrap();
        let mut live = hub.on_connect("42", "42").unwrap();

        let targets = hub.list_connections("42");
        assert!(hub.on_disconnect(&gone.connection, CloseReason::ClientClosed));

        let report = dispatcher.fan_out(&targets, &OutboundMessage::from("late"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.dropped, 0);
        assert_eq!(live.outbound.try_recv().unwrap(), OutboundMessage::from("late"));
        assert_eq!(gone.connection.close_reason(), Some(CloseReason::ClientClosed));
    }

    #[test]
    fn test_overflow_disconnects_slow_consumer() {
        let dispatcher = dispatcher(1, OverflowPolicy::Disconnect);
        let hub = dispatcher.hub().clone();
        let slow = hub.on_connect("1", "1").unwrap();

        assert_eq!(dispatcher.send_to_user("1", Payload::from("a")).delivered, 1);
        let report = dispatcher.send_to_user("1", Payload::from("b"));

        assert_eq!(report.dropped, 1);
        assert_eq!(slow.connection.close_reason(), Some(CloseReason::SlowConsumer));
        assert_eq!(hub.count_connections("1"), 0);
    }

    #[test]
    fn test_overflow_drop_newest_keeps_connection() {
        let dispatcher = dispatcher(1, OverflowPolicy::DropNewest);
        let hub = dispatcher.hub().clone();
        let mut slow = hub.on_connect("1", "1").unwrap();

        dispatcher.send_to_user("1", Payload::from("a"));
        let report = dispatcher.send_to_user("1", Payload::from("b"));

        assert_eq!(report.dropped, 1);
        assert!(slow.connection.is_open());
        assert_eq!(slow.outbound.try_recv().unwrap(), OutboundMessage::from("a"));
        assert!(slow.outbound.try_recv().is_err());
    }

    #[test]
    fn test_stats_tracking() {
        let dispatcher = dispatcher(8, OverflowPolicy::Disconnect);
        let _conn = dispatcher.hub().on_connect("1", "1").unwrap();

        dispatcher.send_to_user("1", Payload::from("a"));
        dispatcher.publish_to_topic("scan-x", Payload::from("b"));

        let stats = dispatcher.stats();
        assert_eq!(stats.total_sent, 2);
        assert_eq!(stats.total_delivered, 1);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.topic_messages, 1);
    }

    #[test]
    fn test_send_control_and_broadcast() {
        let dispatcher = dispatcher(8, OverflowPolicy::Disconnect);
        let mut a = dispatcher.hub().on_connect("1", "1").unwrap();
        let mut b = dispatcher.hub().on_connect("2", "2").unwrap();

        assert!(dispatcher.send_control(&a.connection, ServerMessage::Pong));
        assert_eq!(a.outbound.try_recv().unwrap(), ServerMessage::Pong.into());

        let report = dispatcher.broadcast_control(ServerMessage::Heartbeat);
        assert_eq!(report.delivered, 2);
        assert_eq!(b.outbound.try_recv().unwrap(), ServerMessage::Heartbeat.into());
    }
}
