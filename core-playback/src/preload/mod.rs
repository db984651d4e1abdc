//! # Preload Module
//!
//! Speculative population of the span cache ahead of playback.
//!
//! - [`PreloadScheduler`] decides what to fetch: it reconciles a ranked URL
//!   list against live tasks, the cache and network conditions.
//! - [`PreloadTask`] fetches the first bytes of one URL into the store.
//! - [`WorkerPool`] bounds how many fetches run and queue at once.
//! - [`PreloadEventDispatcher`] delivers outcomes to a [`PreloadListener`].

pub mod listener;
pub mod pool;
pub mod scheduler;
pub mod task;

pub use listener::{NoopPreloadListener, PreloadEventDispatcher, PreloadListener};
pub use pool::{Job, PoolError, WorkerPool};
pub use scheduler::{effective_parallelism, PreloadScheduler, ReconcileOutcome, SkipReason};
pub use task::{PreloadContext, PreloadTask, TaskState, FRAGMENT_SIZE};
