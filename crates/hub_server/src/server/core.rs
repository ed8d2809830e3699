//! Core server coordinator implementation.
//!
//! This module contains the [`Server`] struct, the single process-wide
//! entry point that owns the shared resources every connection depends
//! on: the worker pool, the event loop, the pub/sub adapter, the remote
//! connection registry, and the resolved channel-class table.

use crate::{
    broadcast::Broadcaster,
    channel::ChannelRegistry,
    config::ServerConfig,
    connection::{ConnectRequest, Connection, ConnectionTracker},
    error::ServerError,
    event_loop::EventLoop,
    pubsub::PubSubAdapter,
    remote::{self, RemoteConnections},
    worker::WorkerPool,
};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

/// The server coordinator.
///
/// `Server` lazily creates, caches, and hands out the singleton
/// subsystems shared by every connection. Dozens to thousands of
/// concurrently accepted connections, plus any number of administrative
/// tasks, race to obtain the *same* worker pool, event loop, and pub/sub
/// adapter; each is constructed exactly once and published only after
/// construction completes.
///
/// # Architecture
///
/// * **Lazy accessors**: each shared resource is absent until first
///   demand; whichever task asks first constructs it under the single
///   init lock.
/// * **Connection tracking**: connections register on accept and
///   deregister when their protocol future finishes.
/// * **Restart isolation**: `restart` tears down the worker pool only;
///   every other cached resource lives for the process lifetime.
///
/// # Lifecycle
///
/// Created once at process start via [`Server::new`] and passed by `Arc`
/// to every connection and administrative call site; never a hidden
/// process-global. There is no explicit teardown beyond `restart`'s
/// partial reset — process exit discards the coordinator.
pub struct Server {
    /// Configuration, shared read-only.
    config: ServerConfig,

    /// Weak self-reference handed to collaborators that must not keep the
    /// coordinator alive.
    self_ref: Weak<Server>,

    /// Every connection currently open on this process.
    tracker: Arc<ConnectionTracker>,

    /// Single serialization point for first-time construction and restart.
    init: Mutex<()>,

    /// Worker pool slot; the only resource `restart` clears.
    worker_pool: RwLock<Option<Arc<WorkerPool>>>,

    /// Pub/sub adapter slot; left absent on failed construction so the
    /// next accessor call retries.
    pubsub: RwLock<Option<Arc<dyn PubSubAdapter>>>,

    /// Resolved channel-class table; absent until every configured name
    /// resolves.
    channels: RwLock<Option<Arc<ChannelRegistry>>>,

    /// Shared I/O event loop; infallible, process lifetime.
    event_loop: OnceCell<Arc<EventLoop>>,

    /// Cluster-wide connection registry; infallible, process lifetime.
    remote_connections: OnceCell<Arc<RemoteConnections>>,

    /// Heartbeat task guard; starting the heartbeat twice is a no-op.
    heartbeat: OnceCell<JoinHandle<()>>,
}

impl Server {
    /// Creates a coordinator with all lazy fields absent.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            self_ref: Weak::clone(self_ref),
            tracker: Arc::new(ConnectionTracker::new()),
            init: Mutex::new(()),
            worker_pool: RwLock::new(None),
            pubsub: RwLock::new(None),
            channels: RwLock::new(None),
            event_loop: OnceCell::new(),
            remote_connections: OnceCell::new(),
            heartbeat: OnceCell::new(),
        })
    }

    /// A strong handle to this coordinator.
    ///
    /// Fails only if called while the last strong reference is being
    /// dropped, which no supported call path does.
    fn shared(&self) -> Result<Arc<Server>, ServerError> {
        self.self_ref
            .upgrade()
            .ok_or_else(|| ServerError::Internal("server coordinator dropped".to_string()))
    }

    /// The coordinator's configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The tracker holding this process's live connections.
    pub fn connections(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Ordered identifier names declared by the configured connection class.
    pub fn connection_identifiers(&self) -> &[&'static str] {
        self.config.connection_class.identifiers()
    }

    /// The shared worker pool, constructing it on first demand.
    ///
    /// Under concurrent first calls exactly one pool is constructed and
    /// every caller receives the same instance. Construction failure
    /// leaves the slot absent; the next call retries.
    pub async fn worker_pool(&self) -> Result<Arc<WorkerPool>, ServerError> {
        if let Some(pool) = self.worker_pool.read().await.as_ref() {
            return Ok(Arc::clone(pool));
        }

        let _init = self.init.lock().await;
        // Another task may have raced ahead while we waited for the lock
        if let Some(pool) = self.worker_pool.read().await.as_ref() {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(WorkerPool::new(self.config.worker_pool_size)?);
        *self.worker_pool.write().await = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// The shared event loop, constructing it on first demand.
    /// Stable for the process lifetime once created.
    pub fn event_loop(&self) -> Arc<EventLoop> {
        Arc::clone(
            self.event_loop
                .get_or_init(|| Arc::new(EventLoop::new())),
        )
    }

    /// The shared pub/sub adapter, constructing it on first demand.
    ///
    /// Construction may block on the transport and may fail; all racing
    /// callers wait on the single construction attempt, and failure
    /// leaves the slot absent for a later retry. The internal disconnect
    /// relay is subscribed as part of a successful construction.
    pub async fn pubsub(&self) -> Result<Arc<dyn PubSubAdapter>, ServerError> {
        if let Some(adapter) = self.pubsub.read().await.as_ref() {
            return Ok(Arc::clone(adapter));
        }

        let _init = self.init.lock().await;
        if let Some(adapter) = self.pubsub.read().await.as_ref() {
            return Ok(Arc::clone(adapter));
        }

        let server = self.shared()?;
        let adapter = self.config.adapter_factory.build(&server).await?;
        remote::install_disconnect_relay(&server, &adapter).await?;
        *self.pubsub.write().await = Some(Arc::clone(&adapter));
        Ok(adapter)
    }

    /// The resolved channel-class table, resolving it on first demand.
    ///
    /// Every configured channel name is resolved through the channel
    /// source; if any name fails to resolve, nothing is cached and the
    /// next call retries the whole resolution.
    pub async fn channels(&self) -> Result<Arc<ChannelRegistry>, ServerError> {
        if let Some(registry) = self.channels.read().await.as_ref() {
            return Ok(Arc::clone(registry));
        }

        let _init = self.init.lock().await;
        if let Some(registry) = self.channels.read().await.as_ref() {
            return Ok(Arc::clone(registry));
        }

        let mut classes = HashMap::with_capacity(self.config.channel_names.len());
        for name in &self.config.channel_names {
            let class = self.config.channel_source.resolve(name).await?;
            classes.insert(name.clone(), class);
        }

        let registry = Arc::new(ChannelRegistry::new(classes));
        *self.channels.write().await = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// The cluster-wide connection registry, constructing it on first
    /// demand. Stable for the process lifetime once created.
    pub fn remote_connections(&self) -> Arc<RemoteConnections> {
        Arc::clone(self.remote_connections.get_or_init(|| {
            Arc::new(RemoteConnections::new(Weak::clone(&self.self_ref)))
        }))
    }

    /// Accepts an inbound request.
    ///
    /// Ensures the heartbeat is running, builds a connection object bound
    /// to this coordinator and the request, registers it, and spawns its
    /// protocol future. Does not wait for the connection's lifetime.
    pub async fn accept(
        &self,
        request: ConnectRequest,
    ) -> Result<Arc<dyn Connection>, ServerError> {
        self.ensure_heartbeat();

        let connection = self
            .config
            .connection_class
            .build(self.shared()?, request)?;
        self.tracker.add(Arc::clone(&connection));

        let tracker = Arc::clone(&self.tracker);
        let running = Arc::clone(&connection);
        tokio::spawn(async move {
            let id = running.id();
            if let Err(e) = Arc::clone(&running).run().await {
                warn!("Connection {} terminated with error: {}", id, e);
            }
            tracker.remove(id);
        });

        Ok(connection)
    }

    /// Force-closes every connection (cluster-wide) matching the
    /// identifier set. Zero matches is a silent no-op, and an empty
    /// identifier set addresses no connection at all.
    pub async fn disconnect(
        &self,
        identifiers: HashMap<String, String>,
    ) -> Result<(), ServerError> {
        self.remote_connections()
            .matching(identifiers)
            .disconnect()
            .await
    }

    /// Closes every tracked connection, then tears down the worker pool.
    ///
    /// Each close is awaited to completion before the pool is halted, so
    /// no in-flight callback can reference a dead pool. Other cached
    /// resources are untouched: the next [`Server::worker_pool`] call
    /// constructs a fresh pool while the event loop, adapter, remote
    /// registry, and channel table keep their instances.
    ///
    /// No timeout is imposed on connection closure; a connection that
    /// never completes its close blocks restart indefinitely. Callers
    /// needing liveness bounds must wrap this call in their own timeout.
    pub async fn restart(&self) {
        let connections = self.tracker.snapshot();
        info!("🔄 Restarting: closing {} connection(s)", connections.len());
        // Connection-owned locks may be taken during close; keep the init
        // lock out of this phase.
        for connection in connections {
            connection.close().await;
        }

        let _init = self.init.lock().await;
        let pool = self.worker_pool.write().await.take();
        if let Some(pool) = pool {
            pool.halt().await;
            info!("🔄 Worker pool torn down; next demand builds a fresh one");
        }
    }

    /// Publishes `payload` to every subscriber of `broadcasting` through
    /// the shared pub/sub adapter.
    pub async fn broadcast(
        &self,
        broadcasting: &str,
        payload: serde_json::Value,
    ) -> Result<(), ServerError> {
        self.pubsub().await?.broadcast(broadcasting, payload).await
    }

    /// A reusable publishing handle for one broadcasting.
    pub fn broadcaster_for(&self, broadcasting: impl Into<String>) -> Broadcaster {
        Broadcaster::new(Weak::clone(&self.self_ref), broadcasting.into())
    }

    /// Starts the heartbeat task if it is not already running.
    ///
    /// The task pings every tracked connection at the configured
    /// interval; concurrent calls from racing accepts start it once.
    fn ensure_heartbeat(&self) {
        self.heartbeat.get_or_init(|| {
            let tracker = Arc::clone(&self.tracker);
            let beat_every = self.config.heartbeat_interval;
            info!("💓 Heartbeat started (every {:?})", beat_every);
            tokio::spawn(async move {
                let mut ticker = interval(beat_every);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    for connection in tracker.snapshot() {
                        connection.beat().await;
                    }
                }
            })
        });
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get() {
            heartbeat.abort();
        }
    }
}
