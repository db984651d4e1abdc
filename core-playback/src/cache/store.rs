//! Span store contracts.
//!
//! A [`SpanStore`] is a key + range addressable byte store. Every mutation is
//! reported to at most one registered [`SpanStoreListener`] (the evictor in
//! practice). Stores release their internal lock before notifying, so a
//! listener may call back into the store from inside a callback.
//!
//! Because of that, two concurrent mutations of one identity can reach the
//! listener in a different order than the store applied them. A listener
//! that mirrors the store checks [`SpanStore::contains`] before trusting an
//! event.

use bytes::Bytes;
use std::sync::Arc;

use super::span::CacheSpan;
use crate::error::Result;

/// Observer of span store mutations.
///
/// Callbacks run synchronously on the thread performing the mutation.
pub trait SpanStoreListener: Send + Sync {
    /// Whether reads and repeated writes should be reported via
    /// [`on_span_touched`](Self::on_span_touched).
    fn requires_touch_notifications(&self) -> bool {
        false
    }

    /// Called once after the listener has been replayed every existing span.
    fn on_initialized(&self, _store: &dyn SpanStore) {}

    fn on_span_added(&self, store: &dyn SpanStore, span: &CacheSpan);

    fn on_span_removed(&self, store: &dyn SpanStore, span: &CacheSpan);

    /// A span was accessed. `new` replaces `old` in the listener's view; the
    /// two share an identity.
    fn on_span_touched(&self, store: &dyn SpanStore, old: &CacheSpan, new: &CacheSpan);
}

/// Byte-range cache addressed by `(key, position)`.
pub trait SpanStore: Send + Sync {
    /// Registers the mutation listener, replacing any previous one.
    ///
    /// Every span already held is replayed through `on_span_added`,
    /// followed by `on_initialized`.
    fn set_listener(&self, listener: Option<Arc<dyn SpanStoreListener>>);

    /// Stores `data` as the span starting at `position`.
    ///
    /// If a span with this identity exists and is at least as long, it is
    /// only touched and returned. A shorter existing span is replaced
    /// (reported as removed, then added).
    fn write(&self, key: &str, position: u64, data: &[u8]) -> Result<CacheSpan>;

    /// Reads up to `length` contiguous cached bytes starting at `position`.
    ///
    /// Returns `None` if nothing is cached at `position`. The result is
    /// shorter than `length` when coverage ends early. Spans read are touched.
    fn read(&self, key: &str, position: u64, length: u64) -> Result<Option<Bytes>>;

    /// Removes exactly this span. Fails with
    /// [`PlaybackError::SpanNotFound`](crate::error::PlaybackError::SpanNotFound)
    /// if no span with the same identity and length is stored.
    fn remove_span(&self, span: &CacheSpan) -> Result<()>;

    /// Whether exactly this span (identity and length) is currently stored.
    fn contains(&self, span: &CacheSpan) -> bool {
        self.spans(&span.key).contains(span)
    }

    /// Contiguous cached bytes from `position`, capped at `max_length`.
    fn cached_length(&self, key: &str, position: u64, max_length: u64) -> u64;

    /// Spans of `key` in position order.
    fn spans(&self, key: &str) -> Vec<CacheSpan>;

    fn keys(&self) -> Vec<String>;

    fn total_bytes(&self) -> u64;

    fn span_count(&self) -> usize;
}

/// Listener slot shared by the store implementations.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    inner: parking_lot::RwLock<Option<Arc<dyn SpanStoreListener>>>,
}

impl ListenerSlot {
    pub fn set(&self, listener: Option<Arc<dyn SpanStoreListener>>) {
        *self.inner.write() = listener;
    }

    pub fn get(&self) -> Option<Arc<dyn SpanStoreListener>> {
        self.inner.read().clone()
    }

    /// Replays existing spans into a freshly registered listener.
    pub fn replay(&self, store: &dyn SpanStore, spans: &[CacheSpan]) {
        if let Some(listener) = self.get() {
            for span in spans {
                listener.on_span_added(store, span);
            }
            listener.on_initialized(store);
        }
    }

    pub fn notify(&self, store: &dyn SpanStore, change: &SpanChange) {
        let Some(listener) = self.get() else {
            return;
        };
        match change {
            SpanChange::Added(span) => listener.on_span_added(store, span),
            SpanChange::Removed(span) => listener.on_span_removed(store, span),
            SpanChange::Touched(span) => {
                if listener.requires_touch_notifications() {
                    listener.on_span_touched(store, span, span);
                }
            }
        }
    }

    pub fn notify_all(&self, store: &dyn SpanStore, changes: &[SpanChange]) {
        for change in changes {
            self.notify(store, change);
        }
    }
}

/// A mutation collected under the store lock and reported after it is released.
#[derive(Debug, Clone)]
pub(crate) enum SpanChange {
    Added(CacheSpan),
    Removed(CacheSpan),
    Touched(CacheSpan),
}
