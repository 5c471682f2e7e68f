use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::metrics::ConnectionMetrics;

use super::registry::ConnectionRegistry;
use super::stats::{ConnectionInfo, HubStats, TopicInfo, UserConnectionsInfo};
use super::topics::TopicIndex;
use super::types::{
    Admission, CloseReason, Connection, ConnectionId, HubError, HubOptions,
};

/// Registry and topic index, always mutated together
#[derive(Default)]
struct HubState {
    registry: ConnectionRegistry,
    topics: TopicIndex,
}

impl HubState {
    fn record_metrics(&self) {
        ConnectionMetrics::record_snapshot(
            self.registry.total_connections(),
            self.registry.count_active_users(),
            self.topics.topic_count(),
        );
    }
}

/// Owns every live connection and topic subscription of the process.
///
/// One coarse lock guards the registry and the index, so a connection is
/// always either fully present in both or fully absent from both.
pub struct RealtimeHub {
    state: RwLock<HubState>,
    options: HubOptions,
}

impl RealtimeHub {
    pub fn new(options: HubOptions) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            options,
        }
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    /// Admit a connection.
    ///
    /// The claimed (path) user id must match the authenticated identity; a
    /// mismatch closes the connection without it ever being registered.
    pub fn on_connect(
        &self,
        claimed_user_id: &str,
        authenticated_user_id: &str,
    ) -> Result<Admission, HubError> {
        let (tx, rx) = mpsc::channel(self.options.outbound_queue_capacity.max(1));
        let connection = Arc::new(Connection::new(claimed_user_id.to_string(), tx));

        if claimed_user_id != authenticated_user_id {
            connection.close(CloseReason::AuthorizationMismatch);
            tracing::warn!(
                claimed_user_id = %claimed_user_id,
                authenticated_user_id = %authenticated_user_id,
                "Connection rejected: identity mismatch"
            );
            return Err(HubError::AuthorizationMismatch {
                claimed: claimed_user_id.to_string(),
                authenticated: authenticated_user_id.to_string(),
            });
        }

        {
            let mut state = self.state.write();
            if let Err(e) = self.check_limits(&state, claimed_user_id) {
                connection.close(e.close_reason());
                tracing::warn!(user_id = %claimed_user_id, error = %e, "Connection rejected");
                return Err(e);
            }

            connection.open();
            state.registry.register(claimed_user_id, connection.clone());
            state.record_metrics();
        }

        tracing::info!(
            connection_id = %connection.id,
            user_id = %connection.user_id,
            "Connection registered"
        );

        Ok(Admission {
            connection,
            outbound: rx,
        })
    }

    fn check_limits(&self, state: &HubState, user_id: &str) -> Result<(), HubError> {
        let limits = &self.options.limits;

        let total = state.registry.total_connections();
        if total >= limits.max_connections {
            return Err(HubError::ConnectionLimit {
                current: total,
                max: limits.max_connections,
            });
        }

        let per_user = state.registry.count_connections(user_id);
        if per_user >= limits.max_connections_per_user {
            return Err(HubError::UserConnectionLimit {
                user_id: user_id.to_string(),
                current: per_user,
                max: limits.max_connections_per_user,
            });
        }
        Ok(())
    }

    /// Inbound frame from the client. Carries no meaning beyond liveness.
    pub fn on_client_message(&self, connection: &Connection, raw_text: &str) {
        connection.touch();
        tracing::trace!(
            connection_id = %connection.id,
            bytes = raw_text.len(),
            "Liveness signal"
        );
    }

    /// Transition a connection to `Closed` and remove it everywhere.
    ///
    /// Safe to call from every path that notices the disconnect; only the
    /// first call does the cleanup and returns `true`.
    pub fn on_disconnect(&self, connection: &Connection, reason: CloseReason) -> bool {
        let topics = {
            let mut state = self.state.write();
            if !connection.close(reason) {
                return false;
            }
            let topics = state.topics.unsubscribe_all(connection.id);
            state.registry.unregister(connection);
            state.record_metrics();
            topics
        };
        connection.signal_closed();

        tracing::info!(
            connection_id = %connection.id,
            user_id = %connection.user_id,
            reason = reason.as_str(),
            topics_left = topics.len(),
            "Connection unregistered"
        );
        true
    }

    /// Server-initiated close. The transport handler sees the close signal
    /// and sends a close frame carrying `reason`'s code.
    pub fn force_disconnect(&self, connection: &Connection, reason: CloseReason) -> bool {
        let closed = self.on_disconnect(connection, reason);
        if closed {
            tracing::debug!(
                connection_id = %connection.id,
                close_code = reason.close_code(),
                "Connection force-disconnected"
            );
        }
        closed
    }

    /// Server-side disconnect by connection id
    pub fn disconnect(&self, connection_id: ConnectionId, reason: CloseReason) -> bool {
        match self.connection(connection_id) {
            Some(connection) => self.force_disconnect(&connection, reason),
            None => false,
        }
    }

    /// Close every open connection, returning how many were closed
    pub fn disconnect_all(&self, reason: CloseReason) -> usize {
        self.all_connections()
            .iter()
            .filter(|conn| self.force_disconnect(conn, reason))
            .count()
    }

    /// Subscribe a connection to a topic. Subscribing twice is a no-op.
    ///
    /// Returns `Ok(true)` if the subscription is new.
    pub fn subscribe(&self, connection: &Arc<Connection>, topic: &str) -> Result<bool, HubError> {
        let mut state = self.state.write();

        // Checked under the write lock: a closing connection cannot slip in
        if !connection.is_open() || !state.registry.contains(connection.id) {
            return Err(HubError::NotOpen(connection.id));
        }

        if !state.topics.is_subscribed(connection.id, topic) {
            let current = state.topics.subscription_count(connection.id);
            let max = self.options.limits.max_subscriptions_per_connection;
            if current >= max {
                return Err(HubError::SubscriptionLimit { current, max });
            }
        }

        let added = state.topics.subscribe(connection, topic);
        if added {
            state.record_metrics();
            tracing::debug!(connection_id = %connection.id, topic = %topic, "Subscribed to topic");
        }
        Ok(added)
    }

    /// Unsubscribe a connection from a topic. Unknown pairs are a no-op.
    pub fn unsubscribe(&self, connection: &Connection, topic: &str) -> bool {
        let mut state = self.state.write();
        let removed = state.topics.unsubscribe(connection.id, topic);
        if removed {
            state.record_metrics();
            tracing::debug!(connection_id = %connection.id, topic = %topic, "Unsubscribed from topic");
        }
        removed
    }

    /// Remove a connection from every topic, returning the topics it left
    pub fn unsubscribe_all(&self, connection: &Connection) -> Vec<String> {
        let mut state = self.state.write();
        let topics = state.topics.unsubscribe_all(connection.id);
        state.record_metrics();
        topics
    }

    /// Current subscribers of a topic; empty for an unknown topic.
    ///
    /// A subscriber that is no longer registered is an invariant violation:
    /// it panics in debug builds and is pruned in release builds.
    pub fn subscribers_of(&self, topic: &str) -> Vec<Arc<Connection>> {
        let (live, stale): (Vec<_>, Vec<_>) = {
            let state = self.state.read();
            state
                .topics
                .subscribers_of(topic)
                .into_iter()
                .partition(|conn| conn.is_open() && state.registry.contains(conn.id))
        };

        if !stale.is_empty() {
            self.prune_stale_subscribers(topic, &stale);
        }
        live
    }

    fn prune_stale_subscribers(&self, topic: &str, stale: &[Arc<Connection>]) {
        let ids: Vec<ConnectionId> = stale.iter().map(|conn| conn.id).collect();
        tracing::error!(
            topic = %topic,
            connection_ids = ?ids,
            "Topic references unregistered connections, pruning"
        );
        debug_assert!(
            ids.is_empty(),
            "topic {topic} references unregistered connections: {ids:?}"
        );

        let mut state = self.state.write();
        for id in ids {
            if !state.registry.contains(id) {
                state.topics.unsubscribe(id, topic);
            }
        }
        state.record_metrics();
    }

    /// Topics a connection is subscribed to, sorted
    pub fn subscriptions_of(&self, connection: &Connection) -> Vec<String> {
        self.state.read().topics.topics_of(connection.id)
    }

    pub fn list_connections(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.state.read().registry.list_connections(user_id)
    }

    pub fn count_connections(&self, user_id: &str) -> usize {
        self.state.read().registry.count_connections(user_id)
    }

    pub fn count_active_users(&self) -> usize {
        self.state.read().registry.count_active_users()
    }

    pub fn total_connections(&self) -> usize {
        self.state.read().registry.total_connections()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.state.read().topics.total_subscriptions()
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        self.state.read().registry.get(connection_id)
    }

    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.state.read().registry.all_connections()
    }

    /// Consistent snapshot for the stats endpoint
    pub fn stats(&self) -> HubStats {
        let state = self.state.read();
        HubStats {
            active_users: state.registry.count_active_users(),
            total_connections: state.registry.total_connections(),
            per_user_connection_counts: state.registry.per_user_counts(),
            topics: state.topics.topic_counts(),
        }
    }

    pub fn list_topics(&self) -> Vec<TopicInfo> {
        self.state
            .read()
            .topics
            .topic_counts()
            .into_iter()
            .map(|(topic, subscriber_count)| TopicInfo {
                topic,
                subscriber_count,
            })
            .collect()
    }

    /// `None` for a topic with no subscribers
    pub fn topic_info(&self, topic: &str) -> Option<TopicInfo> {
        let count = self.state.read().topics.subscriber_count(topic);
        (count > 0).then(|| TopicInfo {
            topic: topic.to_string(),
            subscriber_count: count,
        })
    }

    /// `None` if the user has no open connection
    pub fn user_connections(&self, user_id: &str) -> Option<UserConnectionsInfo> {
        let state = self.state.read();
        let mut connections: Vec<ConnectionInfo> = state
            .registry
            .list_connections(user_id)
            .into_iter()
            .map(|conn| ConnectionInfo {
                id: conn.id,
                state: conn.state(),
                connected_at: conn.connected_at,
                last_activity: conn.last_activity(),
                subscriptions: state.topics.topics_of(conn.id),
            })
            .collect();

        if connections.is_empty() {
            return None;
        }
        connections.sort_by_key(|info| info.connected_at);

        Some(UserConnectionsInfo {
            user_id: user_id.to_string(),
            connection_count: connections.len(),
            connections,
        })
    }

    /// Connections without a liveness signal for longer than `timeout`
    pub fn find_stale_connections(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        let now = Utc::now();
        self.all_connections()
            .into_iter()
            .filter(|conn| conn.idle_for(now) > timeout)
            .collect()
    }

    /// Force-disconnect stale connections and return how many were closed
    pub fn cleanup_stale_connections(&self, timeout: Duration) -> usize {
        self.find_stale_connections(timeout)
            .iter()
            .filter(|conn| {
                tracing::info!(connection_id = %conn.id, "Removing stale connection due to timeout");
                self.force_disconnect(conn, CloseReason::Stale)
            })
            .count()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(HubOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::types::{ConnectionLimits, ConnectionState};

    fn hub_with_limits(limits: ConnectionLimits) -> RealtimeHub {
        RealtimeHub::new(HubOptions {
            limits,
            ..HubOptions::default()
        })
    }

    #[test]
    fn test_connect_registers_open_connection() {
        let hub = RealtimeHub::default();
        let admission = hub.on_connect("42", "42").unwrap();

        assert_eq!(admission.connection.state(), ConnectionState::Open);
        assert_eq!(hub.count_connections("42"), 1);
        assert_eq!(hub.count_active_users(), 1);
    }

    #[test]
    fn test_identity_mismatch_never_registers() {
        let hub = RealtimeHub::default();
        let err = hub.on_connect("5", "9").unwrap_err();

        assert!(matches!(err, HubError::AuthorizationMismatch { .. }));
        assert_eq!(err.close_reason().close_code(), 1008);
        assert!(hub.list_connections("5").is_empty());
        assert!(hub.list_connections("9").is_empty());
        assert_eq!(hub.total_connections(), 0);
    }

    #[test]
    fn test_disconnect_cleanup_runs_once() {
        let hub = RealtimeHub::default();
        let admission = hub.on_connect("42", "42").unwrap();
        let conn = admission.connection;
        hub.subscribe(&conn, "scan-7").unwrap();

        assert!(hub.on_disconnect(&conn, CloseReason::TransportError));
        assert!(!hub.on_disconnect(&conn, CloseReason::ClientClosed));

        assert_eq!(conn.close_reason(), Some(CloseReason::TransportError));
        assert!(hub.subscribers_of("scan-7").is_empty());
        assert_eq!(hub.count_connections("42"), 0);
    }

    #[test]
    fn test_subscribe_after_close_is_rejected() {
        let hub = RealtimeHub::default();
        let conn = hub.on_connect("42", "42").unwrap().connection;
        hub.on_disconnect(&conn, CloseReason::ClientClosed);

        assert_eq!(hub.subscribe(&conn, "scan-1"), Err(HubError::NotOpen(conn.id)));
        assert_eq!(hub.stats().topics.len(), 0);
    }

    #[test]
    fn test_user_connection_limit() {
        let hub = hub_with_limits(ConnectionLimits {
            max_connections: 10,
            max_connections_per_user: 2,
            max_subscriptions_per_connection: 10,
        });

        let _a = hub.on_connect("u", "u").unwrap();
        let _b = hub.on_connect("u", "u").unwrap();
        let err = hub.on_connect("u", "u").unwrap_err();

        assert!(matches!(err, HubError::UserConnectionLimit { current: 2, max: 2, .. }));
        assert_eq!(err.close_reason(), CloseReason::LimitExceeded);
        assert_eq!(hub.count_connections("u"), 2);
        assert!(hub.on_connect("other", "other").is_ok());
    }

    #[test]
    fn test_total_connection_limit() {
        let hub = hub_with_limits(ConnectionLimits {
            max_connections: 1,
            max_connections_per_user: 5,
            max_subscriptions_per_connection: 10,
        });

        let _a = hub.on_connect("a", "a").unwrap();
        let err = hub.on_connect("b", "b").unwrap_err();
        assert!(matches!(err, HubError::ConnectionLimit { current: 1, max: 1 }));
    }

    #[test]
    fn test_subscription_limit_ignores_duplicates() {
        let hub = hub_with_limits(ConnectionLimits {
            max_connections: 10,
            max_connections_per_user: 5,
            max_subscriptions_per_connection: 1,
        });
        let conn = hub.on_connect("u", "u").unwrap().connection;

        assert_eq!(hub.subscribe(&conn, "scan-1"), Ok(true));
        assert_eq!(hub.subscribe(&conn, "scan-1"), Ok(false));
        assert_eq!(
            hub.subscribe(&conn, "scan-2"),
            Err(HubError::SubscriptionLimit { current: 1, max: 1 })
        );
    }

    #[test]
    fn test_stats_snapshot() {
        let hub = RealtimeHub::default();
        let a = hub.on_connect("42", "42").unwrap().connection;
        let _b = hub.on_connect("42", "42").unwrap();
        let _c = hub.on_connect("7", "7").unwrap();
        hub.subscribe(&a, "scan-7").unwrap();

        let stats = hub.stats();
        assert_eq!(stats.active_users, 2);
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.per_user_connection_counts.get("42"), Some(&2));
        assert_eq!(stats.per_user_connection_counts.get("7"), Some(&1));
        assert_eq!(stats.topics.get("scan-7"), Some(&1));
    }

    #[test]
    fn test_user_connections_info() {
        let hub = RealtimeHub::default();
        let a = hub.on_connect("42", "42").unwrap().connection;
        hub.subscribe(&a, "scan-1").unwrap();

        let info = hub.user_connections("42").unwrap();
        assert_eq!(info.connection_count, 1);
        assert_eq!(info.connections[0].subscriptions, vec!["scan-1"]);
        assert!(hub.user_connections("nobody").is_none());
    }

    #[test]
    fn test_topic_info() {
        let hub = RealtimeHub::default();
        let a = hub.on_connect("42", "42").unwrap().connection;
        hub.subscribe(&a, "scan-1").unwrap();

        assert_eq!(hub.topic_info("scan-1").unwrap().subscriber_count, 1);
        assert!(hub.topic_info("scan-2").is_none());
        assert_eq!(hub.list_topics().len(), 1);
    }

    #[test]
    fn test_cleanup_stale_connections() {
        let hub = RealtimeHub::default();
        let conn = hub.on_connect("42", "42").unwrap().connection;
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(hub.cleanup_stale_connections(Duration::from_secs(60)), 0);
        assert_eq!(hub.cleanup_stale_connections(Duration::ZERO), 1);
        assert_eq!(conn.close_reason(), Some(CloseReason::Stale));
        assert_eq!(hub.total_connections(), 0);
    }

    #[test]
    fn test_disconnect_all() {
        let hub = RealtimeHub::default();
        let a = hub.on_connect("1", "1").unwrap().connection;
        let _b = hub.on_connect("2", "2").unwrap();

        assert_eq!(hub.disconnect_all(CloseReason::Shutdown), 2);
        assert_eq!(hub.total_connections(), 0);
        assert_eq!(a.close_reason(), Some(CloseReason::Shutdown));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unregistered connections")]
    fn test_stale_topic_reference_fails_fast_in_debug() {
        let hub = RealtimeHub::default();
        let conn = hub.on_connect("42", "42").unwrap().connection;
        {
            // Corrupt the state: drop the registry entry but keep the topic
            let mut state = hub.state.write();
            state.topics.subscribe(&conn, "scan-1");
            state.registry.unregister(&conn);
        }
        hub.subscribers_of("scan-1");
    }
}
