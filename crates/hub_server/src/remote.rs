//! Server-wide connection lookup and disconnection.
//!
//! [`RemoteConnections`] is the logical view over every connection,
//! whether attached to this process or to a peer reachable through the
//! pub/sub transport. Disconnect requests are published on a reserved
//! internal broadcasting; every process subscribes to it when its adapter
//! is first built and closes whichever local connections match.

use crate::connection::Connection;
use crate::error::ServerError;
use crate::pubsub::PubSubAdapter;
use crate::server::Server;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Broadcasting name reserved for cross-process coordination messages.
pub(crate) const INTERNAL_BROADCASTING: &str = "_switchboard_internal";

/// Registry for locating and disconnecting connections cluster-wide.
///
/// Holds only a weak coordinator reference; the coordinator caches this
/// registry for its own lifetime.
pub struct RemoteConnections {
    server: Weak<Server>,
}

impl RemoteConnections {
    pub(crate) fn new(server: Weak<Server>) -> Self {
        Self { server }
    }

    /// Narrows the registry to connections matching every identifier pair.
    pub fn matching(&self, identifiers: HashMap<String, String>) -> RemoteConnection {
        RemoteConnection {
            server: Weak::clone(&self.server),
            identifiers,
        }
    }
}

/// The set of connections (local or remote) matching an identifier set.
pub struct RemoteConnection {
    server: Weak<Server>,
    identifiers: HashMap<String, String>,
}

impl RemoteConnection {
    /// The identifier pairs this set was narrowed by.
    pub fn identifiers(&self) -> &HashMap<String, String> {
        &self.identifiers
    }

    /// Connections on this process matching the identifier set.
    pub fn local_matches(&self) -> Vec<Arc<dyn Connection>> {
        match self.server.upgrade() {
            Some(server) => server.connections().matching(&self.identifiers),
            None => Vec::new(),
        }
    }

    /// Requests disconnection of every matching connection, cluster-wide.
    ///
    /// Publishes on the internal broadcasting; each process (including
    /// this one) reacts by closing its matching local connections. Zero
    /// matches anywhere is a silent no-op, and an empty identifier set
    /// addresses nothing: it completes without publishing at all.
    pub async fn disconnect(&self) -> Result<(), ServerError> {
        if self.identifiers.is_empty() {
            return Ok(());
        }
        // A dropped coordinator has no connections left to disconnect
        let Some(server) = self.server.upgrade() else {
            return Ok(());
        };
        let payload = json!({
            "type": "disconnect",
            "identifiers": self.identifiers,
        });
        server.broadcast(INTERNAL_BROADCASTING, payload).await
    }
}

/// Subscribes the process to the internal broadcasting.
///
/// Installed once, right after the pub/sub adapter is first constructed.
/// The handler holds only a weak coordinator reference so the adapter
/// does not keep the coordinator alive.
pub(crate) async fn install_disconnect_relay(
    server: &Arc<Server>,
    adapter: &Arc<dyn PubSubAdapter>,
) -> Result<(), ServerError> {
    let weak: Weak<Server> = Arc::downgrade(server);
    adapter
        .subscribe(
            INTERNAL_BROADCASTING,
            Arc::new(move |payload| {
                let Some(server) = weak.upgrade() else {
                    return;
                };
                let Some(identifiers) = parse_disconnect(&payload) else {
                    return;
                };

                let matched = server.connections().matching(&identifiers);
                if matched.is_empty() {
                    return;
                }
                debug!(
                    "🔌 Remote disconnect matched {} local connection(s)",
                    matched.len()
                );
                tokio::spawn(async move {
                    for connection in matched {
                        connection.close().await;
                    }
                });
            }),
        )
        .await
        .map(|_| ())
        .map_err(|e| {
            warn!("Failed to install disconnect relay: {}", e);
            e
        })
}

/// Extracts the identifier set from an internal disconnect payload.
///
/// An empty identifier set addresses no connection, so payloads carrying
/// one are dropped here rather than matched against the tracker.
fn parse_disconnect(payload: &serde_json::Value) -> Option<HashMap<String, String>> {
    if payload.get("type")?.as_str()? != "disconnect" {
        return None;
    }
    let identifiers = payload.get("identifiers")?.as_object()?;
    if identifiers.is_empty() {
        return None;
    }
    let mut parsed = HashMap::with_capacity(identifiers.len());
    for (name, value) in identifiers {
        parsed.insert(name.clone(), value.as_str()?.to_string());
    }
    Some(parsed)
}
