//! Broadcasting capability handle.

use crate::error::ServerError;
use crate::server::Server;
use std::sync::Weak;

/// A reusable handle for publishing to one broadcasting.
///
/// Obtained from [`Server::broadcaster_for`]; every broadcaster for the
/// same coordinator publishes through the same shared pub/sub adapter.
/// The handle does not keep the coordinator alive.
pub struct Broadcaster {
    server: Weak<Server>,
    broadcasting: String,
}

impl Broadcaster {
    pub(crate) fn new(server: Weak<Server>, broadcasting: String) -> Self {
        Self {
            server,
            broadcasting,
        }
    }

    /// The broadcasting this handle publishes to.
    pub fn broadcasting(&self) -> &str {
        &self.broadcasting
    }

    /// Publishes `payload` to every subscriber of this broadcasting.
    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<(), ServerError> {
        let server = self
            .server
            .upgrade()
            .ok_or_else(|| ServerError::Internal("server coordinator dropped".to_string()))?;
        server.broadcast(&self.broadcasting, payload).await
    }
}
