//! User -> open connections mapping

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::types::{Connection, ConnectionId};

/// Tracks every open connection and the user that owns it.
///
/// Not synchronized on its own: the hub keeps it behind the same lock as the
/// topic index so that both structures change together.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// connection_id -> Connection
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// user_id -> Set<connection_id> (a user may hold several tabs/devices)
    user_index: HashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to its user's set.
    ///
    /// Returns `false` if the connection was already registered.
    pub fn register(&mut self, user_id: &str, connection: Arc<Connection>) -> bool {
        debug_assert_eq!(user_id, connection.user_id, "registering under a foreign user");

        let conn_id = connection.id;
        if self.connections.contains_key(&conn_id) {
            return false;
        }

        self.connections.insert(conn_id, connection);
        self.user_index
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id);
        true
    }

    /// Remove a connection. A second call for the same connection is a no-op.
    pub fn unregister(&mut self, connection: &Connection) -> bool {
        if self.connections.remove(&connection.id).is_none() {
            return false;
        }

        if let Some(user_conns) = self.user_index.get_mut(&connection.user_id) {
            user_conns.remove(&connection.id);
            if user_conns.is_empty() {
                self.user_index.remove(&connection.user_id);
            }
        }
        true
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&connection_id).cloned()
    }

    pub fn list_connections(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.user_index
            .get(user_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count_connections(&self, user_id: &str) -> usize {
        self.user_index.get(user_id).map_or(0, HashSet::len)
    }

    pub fn count_active_users(&self) -> usize {
        self.user_index.len()
    }

    pub fn total_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections.values().cloned().collect()
    }

    pub fn per_user_counts(&self) -> BTreeMap<String, usize> {
        self.user_index
            .iter()
            .map(|(user_id, conns)| (user_id.clone(), conns.len()))
            .collect()
    }
}
