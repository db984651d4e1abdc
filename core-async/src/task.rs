//! Task spawning.
//!
//! Async work goes through [`spawn`] (or [`spawn_on`] when the caller holds a
//! runtime handle captured from a longer-lived scope). Synchronous disk I/O
//! such as span writes goes through [`spawn_blocking`] so it never stalls an
//! executor thread.
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//!
//! # core_async::runtime::block_on(async {
//! let written = task::spawn_blocking(|| {
//!     // synchronous file write
//!     4096usize
//! })
//! .await
//! .unwrap();
//! assert_eq!(written, 4096);
//! # });
//! ```

pub use tokio::task::{spawn_blocking, yield_now, AbortHandle, JoinError, JoinHandle, JoinSet};

use crate::runtime::Handle;

/// Spawns a new asynchronous task on the current runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Spawns a new asynchronous task on the runtime behind `handle`.
///
/// Used by components that outlive the call site that created them: they
/// capture a handle at construction and keep spawning onto that runtime even
/// when invoked from a plain thread.
pub fn spawn_on<F>(handle: &Handle, future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle.spawn(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
