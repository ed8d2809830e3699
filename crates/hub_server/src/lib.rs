//! # Hub Server - Real-Time Messaging Coordinator
//!
//! The process-wide coordination core for a real-time, bidirectional
//! messaging server: the hub that accepts persistent client connections
//! and routes published messages to subscribed clients across one or
//! many server processes.
//!
//! ## Design Philosophy
//!
//! This crate contains **no protocol logic** - it owns and exposes the
//! shared resources the protocol layers depend on:
//!
//! * **Worker pool** - bounded executor running connection callbacks off
//!   the accept path
//! * **Event loop** - shared I/O task multiplexing for all connections
//! * **Pub/sub adapter** - fan-out transport, potentially cross-process
//! * **Remote connection registry** - cluster-wide lookup and disconnect
//! * **Channel registry** - resolved channel-class table
//!
//! Each resource is created lazily, exactly once, and handed out through
//! thread-safe accessors on the [`Server`] coordinator; the wire
//! protocol, subscription state machines, and broker transports live
//! behind the trait seams in [`connection`], [`channel`], and [`pubsub`].
//!
//! ## Concurrency Model
//!
//! All coordinator state is safe under true parallel access. First-time
//! construction and restart serialize on a single init lock; the fast
//! path for an already-present resource takes no init lock at all. No
//! caller ever observes a half-built subsystem, and the coordinator
//! never holds its lock while calling into connection code.

// Re-export core types for easy access
pub use broadcast::Broadcaster;
pub use channel::{ChannelClass, ChannelRegistry, ChannelSource, StaticChannel, StaticChannelSource};
pub use config::ServerConfig;
pub use connection::{ConnectRequest, Connection, ConnectionClass, ConnectionTracker};
pub use error::ServerError;
pub use event_loop::EventLoop;
pub use pubsub::{
    AdapterFactory, MemoryAdapter, MemoryAdapterFactory, MessageHandler, PubSubAdapter,
    SubscriberId,
};
pub use remote::{RemoteConnection, RemoteConnections};
pub use server::Server;
pub use worker::WorkerPool;

// Public module declarations
pub mod broadcast;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod pubsub;
pub mod remote;
pub mod server;
pub mod worker;
