//! Synchronization primitives.
//!
//! Async-aware locks and channels come from tokio. Cooperative cancellation
//! uses [`CancellationToken`]: every preload task owns one and its fetch
//! races I/O against `token.cancelled()`.
//!
//! Short critical sections that never cross an `.await` (the eviction index,
//! task state cells) use `parking_lot` locks in the consuming crates instead.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{mpsc, CancellationToken};
//!
//! # core_async::runtime::block_on(async {
//! let (tx, mut rx) = mpsc::channel::<u32>(1);
//! tx.try_send(1).unwrap();
//! assert!(tx.try_send(2).is_err()); // bounded: second send is rejected
//! assert_eq!(rx.recv().await, Some(1));
//!
//! let token = CancellationToken::new();
//! token.cancel();
//! assert!(token.is_cancelled());
//! # });
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedSemaphorePermit, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
