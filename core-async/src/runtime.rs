//! Runtime handles.
//!
//! Long-lived components (the preload scheduler, its worker pool, the event
//! dispatcher) capture a [`Handle`] when they are built so they can be driven
//! from any thread afterwards.

pub use tokio::runtime::{Builder, Handle, Runtime, TryCurrentError};

/// Runs the provided future to completion on a fresh current-thread runtime.
///
/// Panics if the runtime cannot be created; only meant for tests, doc
/// examples and synchronous entry points outside any runtime.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}

/// Returns the handle of the runtime the caller is running on, if any.
pub fn current_handle() -> Option<Handle> {
    Handle::try_current().ok()
}
