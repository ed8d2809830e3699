//! Server configuration consumed by the coordinator.
//!
//! The coordinator reads this structure and never mutates it. The
//! collaborator seams (connection class, channel source, adapter factory)
//! are trait objects so callers can wire in their own implementations.

use crate::channel::{ChannelSource, StaticChannelSource};
use crate::connection::ConnectionClass;
use crate::pubsub::{AdapterFactory, MemoryAdapterFactory};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration parameters for the server coordinator.
///
/// Shared read-only across every connection and administrative caller.
/// Defaults favor local development: a small worker pool, the in-process
/// pub/sub adapter, and no configured channels.
#[derive(Clone)]
pub struct ServerConfig {
    /// Maximum number of worker tasks in the pool.
    pub worker_pool_size: usize,

    /// Interval between heartbeat pings sent to every tracked connection.
    pub heartbeat_interval: Duration,

    /// Names of the channels this server serves. Each name must be
    /// resolvable through `channel_source` or the channel-class accessor
    /// fails.
    pub channel_names: Vec<String>,

    /// The connection class used to build a connection object for every
    /// accepted request.
    pub connection_class: Arc<dyn ConnectionClass>,

    /// Lookup used to resolve configured channel names into channel classes.
    pub channel_source: Arc<dyn ChannelSource>,

    /// Factory for the pub/sub adapter shared by all connections.
    pub adapter_factory: Arc<dyn AdapterFactory>,
}

impl ServerConfig {
    /// Creates a configuration with defaults around the given connection class.
    pub fn new(connection_class: Arc<dyn ConnectionClass>) -> Self {
        Self {
            worker_pool_size: 4,
            heartbeat_interval: Duration::from_secs(3),
            channel_names: Vec::new(),
            connection_class,
            channel_source: Arc::new(StaticChannelSource::new()),
            adapter_factory: Arc::new(MemoryAdapterFactory),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("worker_pool_size", &self.worker_pool_size)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("channel_names", &self.channel_names)
            .finish_non_exhaustive()
    }
}
