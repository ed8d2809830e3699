//! Bounded worker pool for per-connection callback work.
//!
//! Connection and channel callbacks run here instead of on the accepting
//! tasks. The pool is a fixed set of worker tasks draining a shared queue;
//! `halt` closes the queue, lets workers drain what is in flight, and
//! waits for them to exit.

use crate::error::ServerError;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type Job = BoxFuture<'static, ()>;

/// Bounded-concurrency executor running submitted futures on a fixed
/// number of worker tasks.
pub struct WorkerPool {
    max_size: usize,
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    halted: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool with `max_size` workers.
    ///
    /// Fails with a configuration error when `max_size` is zero. Must be
    /// called from within a tokio runtime.
    pub fn new(max_size: usize) -> Result<Self, ServerError> {
        if max_size == 0 {
            return Err(ServerError::Configuration(
                "worker pool size must be at least 1".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::channel::<Job>(max_size * 16);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..max_size)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while waiting for the
                        // next job, never while running one.
                        let job = { receiver.lock().await.recv().await };
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    trace!("Worker {} exited", index);
                })
            })
            .collect();

        debug!("🧵 Worker pool started with {} worker(s)", max_size);
        Ok(Self {
            max_size,
            queue: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            halted: AtomicBool::new(false),
        })
    }

    /// The configured worker count.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether `halt` has been called.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Submits work to the pool, waiting for queue capacity if necessary.
    ///
    /// Fails with [`ServerError::PoolHalted`] once the pool is halted.
    pub async fn execute<F>(&self, work: F) -> Result<(), ServerError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let sender = {
            let queue = self.queue.lock().await;
            match queue.as_ref() {
                Some(sender) => sender.clone(),
                None => return Err(ServerError::PoolHalted),
            }
        };

        sender
            .send(Box::pin(work))
            .await
            .map_err(|_| ServerError::PoolHalted)
    }

    /// Stops accepting new work, drains queued jobs, and waits for every
    /// worker to exit. Calling `halt` a second time is a no-op.
    pub async fn halt(&self) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the sender closes the queue; workers finish in-flight
        // and queued jobs, then observe the closed channel and exit.
        self.queue.lock().await.take();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            let _ = worker.await;
        }
        debug!("🧵 Worker pool halted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_zero_size_is_rejected() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime should build");
        let _guard = runtime.enter();
        assert!(matches!(
            WorkerPool::new(0),
            Err(ServerError::Configuration(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_executes_submitted_work() {
        let pool = WorkerPool::new(2).expect("pool should build");
        let counter = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let done = Arc::clone(&done);
            pool.execute(async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 7 {
                    done.notify_one();
                }
            })
            .await
            .expect("execute should succeed");
        }

        timeout(Duration::from_secs(2), done.notified())
            .await
            .expect("all jobs should run");
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_halt_drains_and_is_idempotent() {
        let pool = WorkerPool::new(2).expect("pool should build");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            pool.execute(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .expect("execute should succeed");
        }

        pool.halt().await;
        assert!(pool.is_halted());
        // Queued work ran before the workers exited
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        // Second halt must be a no-op, not a hang or panic
        timeout(Duration::from_secs(1), pool.halt())
            .await
            .expect("second halt should return immediately");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_after_halt_fails() {
        let pool = WorkerPool::new(1).expect("pool should build");
        pool.halt().await;

        let result = pool.execute(async {}).await;
        assert!(matches!(result, Err(ServerError::PoolHalted)));
    }
}
