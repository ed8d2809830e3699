//! Connection contracts and tracking.
//!
//! This module defines the boundary between the coordinator and the
//! protocol layer: the [`Connection`] object built for every accepted
//! request, the [`ConnectionClass`] that builds it, and the
//! [`ConnectionTracker`] holding every live connection in this process.

pub mod tracker;

pub use tracker::ConnectionTracker;

use crate::error::ServerError;
use crate::server::Server;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use uuid::Uuid;

/// An inbound transport-level request handed to [`Server::accept`].
///
/// Carries the client's address, any request parameters extracted by the
/// acceptance layer, and (when the transport is TCP) the raw stream for
/// the connection object to drive.
pub struct ConnectRequest {
    /// The remote network address of the client.
    pub remote_addr: SocketAddr,

    /// Request parameters (query string, headers) as flat key/value pairs.
    pub params: HashMap<String, String>,

    /// The accepted stream, when the acceptance layer owns one. Tests and
    /// in-process callers pass `None`.
    pub stream: Option<TcpStream>,
}

impl ConnectRequest {
    /// Creates a request with no parameters and no stream.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            params: HashMap::new(),
            stream: None,
        }
    }
}

/// Builds connection objects for accepted requests.
///
/// The coordinator holds exactly one connection class, taken from its
/// configuration; `identifiers` declares the ordered attribute names by
/// which connections built from this class can be addressed.
pub trait ConnectionClass: Send + Sync {
    /// Ordered identifier names declared by this connection class.
    fn identifiers(&self) -> &[&'static str];

    /// Constructs a connection bound to the coordinator and the request.
    ///
    /// The returned connection drives its own lifecycle through the
    /// coordinator's accessors; construction itself must not block on I/O.
    fn build(
        &self,
        server: Arc<Server>,
        request: ConnectRequest,
    ) -> Result<Arc<dyn Connection>, ServerError>;
}

/// A single client's persistent logical session with the server.
///
/// The coordinator only needs identity, heartbeat, and close semantics;
/// everything protocol-specific lives behind [`Connection::run`].
#[async_trait]
pub trait Connection: Send + Sync {
    /// Unique id of this connection within the process.
    fn id(&self) -> Uuid;

    /// The value of a declared identifier, if this connection carries it.
    fn identifier(&self, name: &str) -> Option<String>;

    /// Drives the connection's protocol until the client goes away or the
    /// connection is closed. The coordinator spawns this future and does
    /// not wait on it.
    async fn run(self: Arc<Self>) -> Result<(), ServerError>;

    /// Closes the connection. Returns only once the close has completed;
    /// `restart` relies on this to sequence connection teardown before
    /// worker-pool teardown.
    async fn close(&self);

    /// Sends a heartbeat ping to the client.
    async fn beat(&self);
}
