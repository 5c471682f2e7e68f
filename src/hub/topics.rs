//! Topic (scan id) -> subscribed connections

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::types::{Connection, ConnectionId};

/// Two-way subscription index: topic -> subscribers and connection -> topics.
///
/// Both directions are updated in the same call so they never disagree.
/// Topics are pruned as soon as their last subscriber leaves.
#[derive(Default)]
pub struct TopicIndex {
    /// topic -> (connection_id -> Connection)
    subscribers: HashMap<String, HashMap<ConnectionId, Arc<Connection>>>,
    /// connection_id -> Set<topic>
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

impl TopicIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a topic. Returns `false` if it already was.
    pub fn subscribe(&mut self, connection: &Arc<Connection>, topic: &str) -> bool {
        let added = self
            .memberships
            .entry(connection.id)
            .or_default()
            .insert(topic.to_string());

        if added {
            self.subscribers
                .entry(topic.to_string())
                .or_default()
                .insert(connection.id, connection.clone());
        }
        added
    }

    /// Remove one (connection, topic) pair. Unknown pairs are a no-op.
    pub fn unsubscribe(&mut self, connection_id: ConnectionId, topic: &str) -> bool {
        let removed = match self.memberships.get_mut(&connection_id) {
            Some(topics) => {
                let removed = topics.remove(topic);
                if topics.is_empty() {
                    self.memberships.remove(&connection_id);
                }
                removed
            }
            None => false,
        };

        // Clean the forward side regardless, so a stale entry can be pruned
        let pruned = self.remove_subscriber(topic, connection_id);
        removed || pruned
    }

    /// Remove a connection from every topic, returning the topics it left
    pub fn unsubscribe_all(&mut self, connection_id: ConnectionId) -> Vec<String> {
        let topics: Vec<String> = self
            .memberships
            .remove(&connection_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for topic in &topics {
            self.remove_subscriber(topic, connection_id);
        }
        topics
    }

    pub fn subscribers_of(&self, topic: &str) -> Vec<Arc<Connection>> {
        self.subscribers
            .get(topic)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, connection_id: ConnectionId, topic: &str) -> bool {
        self.memberships
            .get(&connection_id)
            .is_some_and(|topics| topics.contains(topic))
    }

    /// Topics a connection is subscribed to, sorted
    pub fn topics_of(&self, connection_id: ConnectionId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .memberships
            .get(&connection_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn subscription_count(&self, connection_id: ConnectionId) -> usize {
        self.memberships.get(&connection_id).map_or(0, HashSet::len)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.get(topic).map_or(0, HashMap::len)
    }

    pub fn topic_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total (connection, topic) pairs
    pub fn total_subscriptions(&self) -> usize {
        self.memberships.values().map(HashSet::len).sum()
    }

    pub fn topic_counts(&self) -> BTreeMap<String, usize> {
        self.subscribers
            .iter()
            .map(|(topic, conns)| (topic.clone(), conns.len()))
            .collect()
    }

    fn remove_subscriber(&mut self, topic: &str, connection_id: ConnectionId) -> bool {
        let Some(conns) = self.subscribers.get_mut(topic) else {
            return false;
        };
        let removed = conns.remove(&connection_id).is_some();
        if conns.is_empty() {
            self.subscribers.remove(topic);
        }
        removed
    }
}
