//! Shared I/O event loop facade.
//!
//! One event loop is shared by all connections for the process lifetime.
//! It multiplexes connection I/O by spawning and counting the tasks that
//! drive each attached stream on the runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Tracks the I/O-driving tasks attached by connections.
#[derive(Default)]
pub struct EventLoop {
    attached: Arc<AtomicUsize>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `io` on the runtime and counts it as attached until it
    /// completes.
    pub fn attach<F>(&self, io: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let attached = Arc::clone(&self.attached);
        attached.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            io.await;
            attached.fetch_sub(1, Ordering::SeqCst);
        })
    }

    /// Number of currently attached I/O tasks.
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
}
