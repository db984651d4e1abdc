//! Runtime facade for the media prefetch core.
//!
//! Every crate in the workspace goes through this crate for spawning, timers,
//! synchronization and cancellation instead of naming tokio directly. Keeping
//! the executor behind one seam lets hosts embed the core in whatever runtime
//! owns their long-lived scope; the scheduler only ever sees a
//! [`runtime::Handle`].
//!
//! # Modules
//!
//! - `task`: spawning async and blocking work, join handles
//! - `time`: sleep, timeouts, instants
//! - `sync`: channels, locks, semaphores, cancellation tokens
//! - `runtime`: runtime handles and a blocking `block_on` helper
//! - `io`: async read/write traits used by streaming fetches
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::CancellationToken;
//! use core_async::time::{sleep, Duration};
//!
//! # core_async::runtime::block_on(async {
//! let token = CancellationToken::new();
//! let child = token.clone();
//!
//! let handle = core_async::task::spawn(async move {
//!     core_async::select! {
//!         _ = child.cancelled() => "canceled",
//!         _ = sleep(Duration::from_secs(60)) => "finished",
//!     }
//! });
//!
//! token.cancel();
//! assert_eq!(handle.await.unwrap(), "canceled");
//! # });
//! ```

pub mod io;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};

/// Waits on several branches and runs the first one to complete.
pub use tokio::select;
