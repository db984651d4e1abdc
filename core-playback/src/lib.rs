//! # Media Prefetch Core
//!
//! Byte-range disk cache for streamed media with background prefetching.
//!
//! ## Overview
//!
//! This crate handles:
//! - Span storage keyed by normalized content URLs (`cache`)
//! - LRU eviction bounded by bytes, entry age and entry count (`cache::evictor`)
//! - Bounded, cancelable, timed preloads of the first bytes of upcoming
//!   content (`preload`)
//! - A facade wiring all of it from one [`CacheConfig`] (`service`)

pub mod cache;
pub mod config;
pub mod error;
pub mod preload;
pub mod service;

pub use cache::{
    CacheKeyNormalizer, CacheSpan, CacheStats, EvictionLimits, EvictorStats, FileSpanStore,
    IdentityNormalizer, LruSpanEvictor, MemorySpanStore, QueryStrippingNormalizer, SpanId,
    SpanStore, SpanStoreListener,
};
pub use config::{CacheConfig, CacheConfigBuilder, CacheSettings};
pub use error::{PlaybackError, Result};
pub use preload::{
    NoopPreloadListener, PoolError, PreloadListener, PreloadScheduler, PreloadTask,
    ReconcileOutcome, SkipReason, TaskState, WorkerPool,
};
pub use service::{PrefetchService, PrefetchServiceBuilder};
