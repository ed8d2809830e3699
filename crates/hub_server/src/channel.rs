//! Channel classes and their resolution.
//!
//! Channels are named routing units that clients subscribe to. The
//! coordinator resolves every configured channel name into a channel
//! class exactly once, through a [`ChannelSource`] lookup, and caches the
//! resulting [`ChannelRegistry`] for the process lifetime. Resolution
//! failures are not cached; the next accessor call retries.

use crate::error::ServerError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A resolved channel class.
///
/// Subscription semantics live in the protocol layer; the coordinator only
/// needs the class's name and its broadcasting-key scheme.
pub trait ChannelClass: Send + Sync {
    /// The unique channel name clients subscribe with.
    fn name(&self) -> &str;

    /// The broadcasting key for a stream within this channel.
    fn broadcasting_for(&self, stream: &str) -> String {
        format!("{}:{}", self.name(), stream)
    }
}

/// Resolves a channel name into a channel class.
///
/// Populated at startup by an external discovery step; the coordinator
/// consumes it only as a lookup.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// Resolves `name`, failing with [`ServerError::UnknownChannel`] when
    /// the name is not known to this source.
    async fn resolve(&self, name: &str) -> Result<Arc<dyn ChannelClass>, ServerError>;
}

/// A channel class with no behavior beyond its name.
pub struct StaticChannel {
    name: String,
}

impl StaticChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ChannelClass for StaticChannel {
    fn name(&self) -> &str {
        &self.name
    }
}

/// An in-memory channel source backed by a fixed map.
#[derive(Default)]
pub struct StaticChannelSource {
    classes: HashMap<String, Arc<dyn ChannelClass>>,
}

impl StaticChannelSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel class under its own name.
    pub fn register(mut self, class: Arc<dyn ChannelClass>) -> Self {
        self.classes.insert(class.name().to_string(), class);
        self
    }
}

#[async_trait]
impl ChannelSource for StaticChannelSource {
    async fn resolve(&self, name: &str) -> Result<Arc<dyn ChannelClass>, ServerError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| ServerError::UnknownChannel(name.to_string()))
    }
}

/// The resolved channel-class table cached by the coordinator.
pub struct ChannelRegistry {
    classes: HashMap<String, Arc<dyn ChannelClass>>,
}

impl ChannelRegistry {
    pub(crate) fn new(classes: HashMap<String, Arc<dyn ChannelClass>>) -> Self {
        Self { classes }
    }

    /// Looks up a resolved channel class by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ChannelClass>> {
        self.classes.get(name).cloned()
    }

    /// Names of every resolved channel, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
