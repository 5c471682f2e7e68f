//! Hub statistics and info structures

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::{ConnectionId, ConnectionState};

/// Snapshot of the hub taken under a single read lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub active_users: usize,
    pub total_connections: usize,
    pub per_user_connection_counts: BTreeMap<String, usize>,
    /// topic -> subscriber count
    pub topics: BTreeMap<String, usize>,
}

/// Topic information
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub topic: String,
    pub subscriber_count: usize,
}

/// A single open connection as seen by operators
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub subscriptions: Vec<String>,
}

/// Open connections of one user
#[derive(Debug, Clone, Serialize)]
pub struct UserConnectionsInfo {
    pub user_id: String,
    pub connection_count: usize,
    pub connections: Vec<ConnectionInfo>,
}
