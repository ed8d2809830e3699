//! Tracking of live connections in this process.

use super::Connection;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Thread-safe registry of every connection currently open on this process.
///
/// Connections are registered by [`Server::accept`] and deregistered when
/// their `run` future finishes. `restart` and the heartbeat loop operate
/// on snapshots so they never hold the table while calling into
/// connection code.
///
/// [`Server::accept`]: crate::server::Server::accept
#[derive(Default)]
pub struct ConnectionTracker {
    connections: DashMap<Uuid, Arc<dyn Connection>>,
}

impl ConnectionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Registers a connection.
    pub fn add(&self, connection: Arc<dyn Connection>) {
        self.connections.insert(connection.id(), connection);
    }

    /// Deregisters a connection by id. Unknown ids are ignored.
    pub fn remove(&self, id: Uuid) {
        self.connections.remove(&id);
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// A point-in-time copy of every tracked connection.
    pub fn snapshot(&self) -> Vec<Arc<dyn Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Connections whose identifiers match every key/value pair given.
    ///
    /// An empty identifier set addresses no connection and matches
    /// nothing; bulk teardown goes through [`ConnectionTracker::snapshot`].
    pub fn matching(&self, identifiers: &HashMap<String, String>) -> Vec<Arc<dyn Connection>> {
        if identifiers.is_empty() {
            return Vec::new();
        }
        self.connections
            .iter()
            .filter(|entry| {
                identifiers
                    .iter()
                    .all(|(name, value)| entry.value().identifier(name).as_deref() == Some(value))
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;
    use async_trait::async_trait;

    struct StubConnection {
        id: Uuid,
        identifiers: HashMap<String, String>,
    }

    impl StubConnection {
        fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                identifiers: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl Connection for StubConnection {
        fn id(&self) -> Uuid {
            self.id
        }

        fn identifier(&self, name: &str) -> Option<String> {
            self.identifiers.get(name).cloned()
        }

        async fn run(self: Arc<Self>) -> Result<(), ServerError> {
            Ok(())
        }

        async fn close(&self) {}

        async fn beat(&self) {}
    }

    #[test]
    fn test_add_remove_len() {
        let tracker = ConnectionTracker::new();
        assert!(tracker.is_empty());

        let connection = StubConnection::new(&[]);
        let id = connection.id();
        tracker.add(connection);
        assert_eq!(tracker.len(), 1);

        tracker.remove(id);
        assert!(tracker.is_empty());

        // Removing an unknown id is a no-op
        tracker.remove(Uuid::new_v4());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_matching_filters_on_every_pair() {
        let tracker = ConnectionTracker::new();
        tracker.add(StubConnection::new(&[("user_id", "42"), ("role", "admin")]));
        tracker.add(StubConnection::new(&[("user_id", "42"), ("role", "guest")]));
        tracker.add(StubConnection::new(&[("user_id", "7")]));

        let by_user: HashMap<String, String> =
            [("user_id".to_string(), "42".to_string())].into();
        assert_eq!(tracker.matching(&by_user).len(), 2);

        let by_both: HashMap<String, String> = [
            ("user_id".to_string(), "42".to_string()),
            ("role".to_string(), "admin".to_string()),
        ]
        .into();
        assert_eq!(tracker.matching(&by_both).len(), 1);

        let no_match: HashMap<String, String> =
            [("user_id".to_string(), "999".to_string())].into();
        assert!(tracker.matching(&no_match).is_empty());
    }

    #[test]
    fn test_empty_identifier_set_matches_nothing() {
        let tracker = ConnectionTracker::new();
        tracker.add(StubConnection::new(&[("user_id", "1")]));
        tracker.add(StubConnection::new(&[]));

        assert!(tracker.matching(&HashMap::new()).is_empty());
    }
}
