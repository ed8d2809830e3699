//! In-process pub/sub adapter.
//!
//! Fans payloads out to subscribers within this process only. This is the
//! default adapter for development and tests; cross-process deployments
//! plug a broker-backed adapter into the same seam.

use super::{AdapterFactory, MessageHandler, PubSubAdapter, SubscriberId};
use crate::error::ServerError;
use crate::server::Server;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// DashMap-backed subscriber table keyed by broadcasting name.
#[derive(Default)]
pub struct MemoryAdapter {
    subscribers: DashMap<String, Vec<(SubscriberId, MessageHandler)>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on a broadcasting.
    pub fn subscriber_count(&self, broadcasting: &str) -> usize {
        self.subscribers
            .get(broadcasting)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSubAdapter for MemoryAdapter {
    async fn broadcast(
        &self,
        broadcasting: &str,
        payload: serde_json::Value,
    ) -> Result<(), ServerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ServerError::Adapter("adapter is shut down".to_string()));
        }

        // Clone handlers out of the shard before invoking them so user
        // callbacks never run under the table lock.
        let handlers: Vec<MessageHandler> = match self.subscribers.get(broadcasting) {
            Some(entry) => entry.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => return Ok(()),
        };

        debug!(
            "📤 Broadcasting to '{}' ({} subscriber(s))",
            broadcasting,
            handlers.len()
        );
        for handler in handlers {
            handler(payload.clone());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        broadcasting: &str,
        handler: MessageHandler,
    ) -> Result<SubscriberId, ServerError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ServerError::Adapter("adapter is shut down".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .entry(broadcasting.to_string())
            .or_default()
            .push((id, handler));
        Ok(id)
    }

    async fn unsubscribe(&self, broadcasting: &str, id: SubscriberId) -> Result<(), ServerError> {
        if let Some(mut entry) = self.subscribers.get_mut(broadcasting) {
            entry.retain(|(subscriber, _)| *subscriber != id);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ServerError> {
        self.shut_down.store(true, Ordering::SeqCst);
        self.subscribers.clear();
        Ok(())
    }
}

/// Factory producing [`MemoryAdapter`] instances. Used by the default
/// server configuration.
pub struct MemoryAdapterFactory;

#[async_trait]
impl AdapterFactory for MemoryAdapterFactory {
    async fn build(&self, _server: &Arc<Server>) -> Result<Arc<dyn PubSubAdapter>, ServerError> {
        Ok(Arc::new(MemoryAdapter::new()))
    }
}
