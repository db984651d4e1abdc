//! Bounded worker pool for preload jobs.
//!
//! `core_size` long-lived workers drain a bounded queue. When the queue is
//! full and fewer than `max_size` workers exist, an overflow worker is
//! started: it runs the rejected job, keeps draining the queue while jobs are
//! immediately available, then exits. Beyond that, submissions are refused.

use core_async::runtime::Handle;
use core_async::sync::mpsc::{self, error::TrySendError};
use core_async::task::{AbortHandle, JoinHandle};
use core_async::time::{timeout, Duration};
use futures::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

/// Unit of work accepted by the pool.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Why the pool refused a job.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// Every worker is busy and the queue is full.
    #[error("worker pool saturated")]
    Saturated,

    /// The pool no longer accepts work.
    #[error("worker pool is shut down")]
    ShutDown,
}

struct Shared {
    receiver: core_async::sync::Mutex<mpsc::Receiver<Job>>,
    workers: AtomicUsize,
}

pub struct WorkerPool {
    handle: Handle,
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    join_handles: Mutex<Vec<JoinHandle<()>>>,
    core_size: usize,
    max_size: usize,
}

impl WorkerPool {
    /// Starts `core_size` workers on the runtime behind `handle`.
    ///
    /// Zero sizes are bumped to one and `max_size` is raised to `core_size`.
    pub fn new(handle: Handle, core_size: usize, max_size: usize, queue_capacity: usize) -> Self {
        let core_size = core_size.max(1);
        let max_size = max_size.max(core_size);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));

        let shared = Arc::new(Shared {
            receiver: core_async::sync::Mutex::new(receiver),
            workers: AtomicUsize::new(core_size),
        });

        let join_handles = (0..core_size)
            .map(|id| handle.spawn(core_worker(Arc::clone(&shared), id)))
            .collect();

        debug!(core_size, max_size, queue_capacity, "Worker pool started");

        Self {
            handle,
            shared,
            sender: Mutex::new(Some(sender)),
            join_handles: Mutex::new(join_handles),
            core_size,
            max_size,
        }
    }

    pub fn from_config(handle: Handle, config: &CacheConfig) -> Self {
        Self::new(
            handle,
            config.core_pool_size(),
            config.max_pool_size(),
            config.queue_capacity(),
        )
    }

    /// Runtime the workers run on.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn core_size(&self) -> usize {
        self.core_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Workers currently alive, core and overflow.
    pub fn worker_count(&self) -> usize {
        self.shared.workers.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queues `job` or hands it to a new overflow worker.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let sender = self.sender.lock().clone().ok_or(PoolError::ShutDown)?;

        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(PoolError::ShutDown),
            Err(TrySendError::Full(job)) => {
                if !self.reserve_overflow_worker() {
                    warn!(
                        workers = self.worker_count(),
                        max_size = self.max_size,
                        "Worker pool saturated, dropping job"
                    );
                    return Err(PoolError::Saturated);
                }

                let worker = self
                    .handle
                    .spawn(overflow_worker(Arc::clone(&self.shared), job));
                let mut handles = self.join_handles.lock();
                handles.retain(|h| !h.is_finished());
                handles.push(worker);
                Ok(())
            }
        }
    }

    fn reserve_overflow_worker(&self) -> bool {
        self.shared
            .workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max_size).then_some(count + 1)
            })
            .is_ok()
    }

    /// Stops accepting work and waits up to `grace` for queued and running
    /// jobs to finish. Workers still running afterwards are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        drop(self.sender.lock().take());

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.join_handles.lock());
        if handles.is_empty() {
            return;
        }
        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();

        match timeout(grace, join_all(handles)).await {
            Ok(_) => debug!("Worker pool drained"),
            Err(_) => {
                info!(
                    grace_ms = grace.as_millis() as u64,
                    "Worker pool did not drain in time, aborting workers"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

async fn core_worker(shared: Arc<Shared>, id: usize) {
    loop {
        let job = {
            let mut receiver = shared.receiver.lock().await;
            receiver.recv().await
        };
        match job {
            Some(job) => job.await,
            None => break,
        }
    }
    shared.workers.fetch_sub(1, Ordering::AcqRel);
    debug!(worker = id, "Core worker stopped");
}

async fn overflow_worker(shared: Arc<Shared>, first: Job) {
    first.await;
    loop {
        // A core worker holding the receiver is already waiting for work.
        let next = match shared.receiver.try_lock() {
            Ok(mut receiver) => receiver.try_recv().ok(),
            Err(_) => None,
        };
        match next {
            Some(job) => job.await,
            None => break,
        }
    }
    shared.workers.fetch_sub(1, Ordering::AcqRel);
}
