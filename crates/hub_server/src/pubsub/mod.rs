//! Pub/sub transport adapter seam.
//!
//! The adapter is the transport used to fan messages out to subscribers,
//! potentially across server processes. The coordinator owns a single
//! shared adapter instance, built lazily through an [`AdapterFactory`];
//! a failed build leaves the coordinator's slot absent so the next
//! accessor call retries.

pub mod memory;

pub use memory::{MemoryAdapter, MemoryAdapterFactory};

use crate::error::ServerError;
use crate::server::Server;
use async_trait::async_trait;
use std::sync::Arc;

/// Identifies one subscription on one broadcasting.
pub type SubscriberId = u64;

/// Callback invoked with every payload published to a broadcasting.
///
/// Handlers must not block; long-running reactions belong on the worker
/// pool or a spawned task.
pub type MessageHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Transport used to broadcast payloads to subscribers.
#[async_trait]
pub trait PubSubAdapter: Send + Sync {
    /// Publishes `payload` to every subscriber of `broadcasting`.
    async fn broadcast(&self, broadcasting: &str, payload: serde_json::Value)
        -> Result<(), ServerError>;

    /// Registers `handler` for `broadcasting` and returns a handle for
    /// later unsubscription.
    async fn subscribe(
        &self,
        broadcasting: &str,
        handler: MessageHandler,
    ) -> Result<SubscriberId, ServerError>;

    /// Removes one subscription. Unknown ids are a no-op.
    async fn unsubscribe(&self, broadcasting: &str, id: SubscriberId) -> Result<(), ServerError>;

    /// Shuts the adapter down; subsequent broadcasts fail.
    async fn shutdown(&self) -> Result<(), ServerError>;
}

/// Builds the pub/sub adapter for a coordinator.
///
/// The factory receives the coordinator so transport implementations can
/// reach its configuration. Building may fail (bad configuration,
/// unreachable endpoint); the coordinator surfaces the failure to the
/// calling accessor and retries on the next call.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn build(&self, server: &Arc<Server>) -> Result<Arc<dyn PubSubAdapter>, ServerError>;
}
