//! Time-related operations.
//!
//! Preload tasks arm their timeout with [`sleep`]; pool shutdown bounds its
//! grace period with [`timeout`].
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{timeout, sleep, Duration};
//!
//! # core_async::runtime::block_on(async {
//! let slow = timeout(Duration::from_millis(10), sleep(Duration::from_secs(5))).await;
//! assert!(slow.is_err());
//! # });
//! ```

pub use tokio::time::{error::Elapsed, interval, sleep, sleep_until, timeout, Interval, Sleep, Timeout};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
