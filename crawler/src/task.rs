//! This module provides the worker pool running paper tasks.

use std::num::NonZeroU8;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, Future, FutureExt};
use tokio::sync::{mpsc, Mutex};

pub use future::{AbortHandle, Aborted, RemoteHandle};

type Task = future::BoxFuture<'static, ()>;

/// A fixed-size pool of workers processing asynchronous tasks in the background.
///
/// Every worker runs a single task at a time, so no more than `size` tasks are ever executing concurrently,
/// whatever the number of tasks waiting in the queue.
///
/// # Forget tasks
/// Tasks can just be pushed and forgotten using [`Pool::forget()`] method (tasks must return `()`).
///
/// # Keep control over tasks
/// Tasks can alternatively be pushed while still keeping both a remote handle on a task result on completion
/// and an abortable handle to cancel a task using [`Pool::execute()`] method (tasks can return any `T: Send`).
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// # use crawler::task::Pool;
/// let mut pool = Pool::default();
/// pool.start(3.try_into().unwrap());
///
/// for i in 0..=5 {
///     pool.forget(async move { println!("Hello from task #{i}!") });
/// }
///
/// assert!(pool.close_timeout(std::time::Duration::from_secs(1)).await);
/// # })
/// ```
#[derive(Debug, Default)]
pub struct Pool {
    /// The pool of workers.
    workers: Vec<Worker>,
    /// The sending part of a channel to push tasks to the workers.
    ///
    /// The next available worker will wait for a task to be received through the channel.
    sender: Option<mpsc::UnboundedSender<Task>>,
}

impl Pool {
    /// Start a pool with `size` workers.
    ///
    /// Once started, tasks can be pushed and will be picked up by the workers in order.
    ///
    /// # Panics
    /// This method panics if the pool is already running, ie. when called more than once without stopping the pool in between.
    pub fn start(&mut self, size: NonZeroU8) {
        assert!(self.sender.is_none() && self.workers.is_empty());

        let (sender, receiver) = mpsc::unbounded_channel();

        let receiver = Arc::new(Mutex::new(receiver));

        static WORKER_ID: AtomicUsize = AtomicUsize::new(0);
        let size = size.get().into();
        let id = WORKER_ID.fetch_add(size, Ordering::Relaxed);

        self.workers = (0..size).map(|i| Worker::new(id.wrapping_add(i), Arc::clone(&receiver))).collect();
        self.sender = Some(sender);
    }

    /// Number of running workers.
    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool still accepts tasks.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.sender.is_some()
    }

    /// Send a task and keep remote and abort handles on it.
    ///
    /// _Note: if the pool is not running, the task is just lost without executing anything._
    ///
    /// To retrieve a task result on completion, just await on the remote handle:
    /// ```
    /// # tokio_test::block_on(async {
    /// # use crawler::task::Pool;
    /// # let mut pool = Pool::default();
    /// # pool.start(3.try_into().unwrap());
    /// let (remote_handle, _) = pool.execute(async { "Hello world!" });
    ///
    /// assert_eq!(remote_handle.await, Ok("Hello world!"));
    /// # })
    /// ```
    ///
    /// **Be aware that if you just drop the remote handle, it will automatically cancel the task**, either before it
    /// starts or at its next suspension point. Call `remote_handle.forget()` to let it complete in the background.
    ///
    /// To cancel a task, just call `abort_handle.abort()` on the abortable handle.
    /// The remote handle part will then return an `Err(Aborted)` on its side:
    /// ```
    /// # tokio_test::block_on(async {
    /// # use crawler::task::{Aborted, Pool};
    /// # let mut pool = Pool::default();
    /// # pool.start(3.try_into().unwrap());
    /// let (remote_handle, abort_handle) = pool.execute(async { "Hello world!" });
    ///
    /// abort_handle.abort();
    ///
    /// assert_eq!(remote_handle.await, Err(Aborted));
    /// # })
    /// ```
    pub fn execute<T: Send + 'static>(
        &self,
        future: impl Future<Output = T> + Send + 'static,
    ) -> (RemoteHandle<Result<T, Aborted>>, AbortHandle) {
        let (abortable, abort_handle) = future::abortable(future);
        let (remote, remote_handle) = abortable.remote_handle();

        self.forget(remote);

        (remote_handle, abort_handle)
    }

    /// Send a task and forget it.
    ///
    /// _Note: if the pool is not running, the task is just lost without executing anything._
    #[inline]
    pub fn forget(&self, future: impl Future<Output = ()> + Send + 'static) {
        match self.sender {
            Some(ref sender) => {
                if sender.send(future.boxed()).is_err() {
                    tracing::warn!("All workers are gone, dropping task.");
                }
            }
            None => tracing::debug!("Pool is not running, dropping task."),
        }
    }

    /// Stop current pool of workers, waiting for all pending tasks to complete.
    ///
    /// Once stopped, the pool can be started again with any number of workers.
    async fn stop(&mut self) {
        drop(self.sender.take());
        let workers = std::mem::take(&mut self.workers);

        future::join_all(workers.into_iter().inspect(|worker| {
            tracing::debug!("Stopping worker {}...", worker.id);
        }))
        .await;
    }

    /// Close current pool of workers, waiting at most `timeout` for pending tasks to complete.
    ///
    /// Workers still busy when the timeout elapses are aborted, dropping their current task.
    /// Returns whether every worker stopped on its own.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// # use std::time::Duration;
    /// # use crawler::task::Pool;
    /// let mut pool = Pool::default();
    /// pool.start(1.try_into().unwrap());
    ///
    /// pool.forget(std::future::pending());
    ///
    /// assert!(!pool.close_timeout(Duration::from_millis(10)).await);
    /// # })
    /// ```
    pub async fn close_timeout(mut self, timeout: Duration) -> bool {
        let handles: Vec<_> = self.workers.iter().map(|worker| (worker.id, worker.handle.abort_handle())).collect();

        if tokio::time::timeout(timeout, self.stop()).await.is_ok() {
            return true;
        }

        for (id, handle) in handles {
            if !handle.is_finished() {
                tracing::warn!("Aborting worker {id} after {timeout:?}.");
                handle.abort();
            }
        }

        false
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    handle: tokio::task::JoinHandle<()>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>) -> Worker {
        tracing::debug!("Starting worker {id}...");

        Worker {
            id,
            handle: tokio::spawn(async move {
                loop {
                    let message = receiver.lock().await.recv().await;

                    match message {
                        Some(task) => {
                            tracing::trace!("Executing task on worker {id}...");

                            task.await;
                        }
                        None => {
                            tracing::debug!("All tasks exhausted, shutting down worker {id}.");
                            break;
                        }
                    }
                }
            }),
        }
    }
}

impl Future for Worker {
    type Output = Result<(), tokio::task::JoinError>;

    #[inline]
    fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        self.handle.poll_unpin(cx)
    }
}
