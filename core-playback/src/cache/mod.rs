//! # Span Cache Module
//!
//! Byte-range disk cache for streamed media.
//!
//! ## Overview
//!
//! Content is addressed by a normalized key (see [`CacheKeyNormalizer`]) and
//! stored as spans: contiguous byte ranges starting at some offset. A
//! [`SpanStore`] owns the bytes and reports every mutation to one listener,
//! normally an [`LruSpanEvictor`] that keeps the store within its byte, age
//! and entry-count bounds.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────┐   on_span_added / removed / touched
//! │  SpanStore                 │ ─────────────────────────────────┐
//! │  - FileSpanStore (disk)    │                                  ▼
//! │  - MemorySpanStore (heap)  │ ◀── remove_span ──  ┌──────────────────┐
//! └────────────────────────────┘                     │  LruSpanEvictor  │
//!                                                    └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_playback::cache::{EvictionLimits, LruSpanEvictor, MemorySpanStore, SpanStore};
//! use std::sync::Arc;
//!
//! let store = MemorySpanStore::new();
//! let evictor = Arc::new(LruSpanEvictor::new(EvictionLimits {
//!     capacity_bytes: 8,
//!     ttl_ms: 0,
//!     max_entries: 100,
//! }));
//! store.set_listener(Some(evictor.clone()));
//!
//! store.write("https://cdn.example.com/a.mp3", 0, b"abcdef").unwrap();
//! store.write("https://cdn.example.com/b.mp3", 0, b"ghijkl").unwrap();
//!
//! // The older span was evicted to stay within 8 bytes.
//! assert_eq!(store.total_bytes(), 6);
//! ```

pub mod evictor;
pub mod file_store;
mod index;
pub mod key;
pub mod memory_store;
pub mod span;
pub mod stats;
pub mod store;

pub use evictor::{EvictionLimits, EvictorStats, LruSpanEvictor};
pub use file_store::FileSpanStore;
pub use key::{CacheKeyNormalizer, IdentityNormalizer, QueryStrippingNormalizer};
pub use memory_store::MemorySpanStore;
pub use span::{CacheSpan, SpanId};
pub use stats::CacheStats;
pub use store::{SpanStore, SpanStoreListener};
