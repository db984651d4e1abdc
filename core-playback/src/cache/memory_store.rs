//! In-memory span store.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

use super::index::SpanIndex;
use super::span::CacheSpan;
use super::store::{ListenerSlot, SpanChange, SpanStore, SpanStoreListener};
use crate::error::{PlaybackError, Result};

/// [`SpanStore`] keeping span bytes on the heap.
///
/// Meant for hosts without writable storage and for tests. Nothing survives
/// a restart.
#[derive(Default)]
pub struct MemorySpanStore {
    index: Mutex<SpanIndex<Bytes>>,
    listener: ListenerSlot,
}

impl MemorySpanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpanStore for MemorySpanStore {
    fn set_listener(&self, listener: Option<Arc<dyn SpanStoreListener>>) {
        self.listener.set(listener);
        let spans: Vec<CacheSpan> = self
            .index
            .lock()
            .entries()
            .map(|entry| entry.span.clone())
            .collect();
        self.listener.replay(self, &spans);
    }

    fn write(&self, key: &str, position: u64, data: &[u8]) -> Result<CacheSpan> {
        if data.is_empty() {
            return Err(PlaybackError::CacheError(
                "cannot cache an empty span".to_string(),
            ));
        }

        let span = CacheSpan::new(key, position, data.len() as u64);
        let (result, changes) = {
            let mut index = self.index.lock();
            let covering_existing = index
                .get(key, position)
                .filter(|existing| existing.span.length >= span.length)
                .map(|existing| existing.span.clone());

            match covering_existing {
                Some(existing) => (existing.clone(), vec![SpanChange::Touched(existing)]),
                None => {
                    let mut changes = Vec::with_capacity(2);
                    if let Some(previous) = index.insert(span.clone(), Bytes::copy_from_slice(data))
                    {
                        changes.push(SpanChange::Removed(previous.span));
                    }
                    changes.push(SpanChange::Added(span.clone()));
                    (span, changes)
                }
            }
        };

        trace!(key, position, length = result.length, "Span written");
        self.listener.notify_all(self, &changes);
        Ok(result)
    }

    fn read(&self, key: &str, position: u64, length: u64) -> Result<Option<Bytes>> {
        let (data, touched) = {
            let index = self.index.lock();
            let covering = index.contiguous(key, position, length);
            if covering.is_empty() {
                return Ok(None);
            }

            let end = position.saturating_add(length);
            let mut out = BytesMut::new();
            let mut cursor = position;
            for entry in &covering {
                let from = (cursor - entry.span.position) as usize;
                let to = (entry.span.end().min(end) - entry.span.position) as usize;
                out.extend_from_slice(&entry.payload[from..to]);
                cursor = entry.span.position + to as u64;
            }
            let touched: Vec<SpanChange> = covering
                .iter()
                .map(|entry| SpanChange::Touched(entry.span.clone()))
                .collect();
            (out.freeze(), touched)
        };

        self.listener.notify_all(self, &touched);
        Ok(Some(data))
    }

    fn remove_span(&self, span: &CacheSpan) -> Result<()> {
        {
            let mut index = self.index.lock();
            let matches = index
                .get(&span.key, span.position)
                .is_some_and(|entry| entry.span.length == span.length);
            if !matches {
                return Err(PlaybackError::SpanNotFound {
                    key: span.key.clone(),
                    position: span.position,
                });
            }
            index.remove(&span.key, span.position);
        }

        self.listener
            .notify(self, &SpanChange::Removed(span.clone()));
        Ok(())
    }

    fn contains(&self, span: &CacheSpan) -> bool {
        self.index
            .lock()
            .get(&span.key, span.position)
            .is_some_and(|entry| entry.span.length == span.length)
    }

    fn cached_length(&self, key: &str, position: u64, max_length: u64) -> u64 {
        self.index.lock().cached_length(key, position, max_length)
    }

    fn spans(&self, key: &str) -> Vec<CacheSpan> {
        self.index.lock().spans(key)
    }

    fn keys(&self) -> Vec<String> {
        self.index.lock().keys()
    }

    fn total_bytes(&self) -> u64 {
        self.index.lock().total_bytes()
    }

    fn span_count(&self) -> usize {
        self.index.lock().span_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        log: Mutex<Vec<String>>,
    }

    impl SpanStoreListener for RecordingListener {
        fn requires_touch_notifications(&self) -> bool {
            true
        }

        fn on_initialized(&self, store: &dyn SpanStore) {
            self.log
                .lock()
                .push(format!("init:{}", store.span_count()));
        }

        fn on_span_added(&self, _store: &dyn SpanStore, span: &CacheSpan) {
            self.log.lock().push(format!("add:{}", span));
        }

        fn on_span_removed(&self, _store: &dyn SpanStore, span: &CacheSpan) {
            self.log.lock().push(format!("remove:{}", span));
        }

        fn on_span_touched(&self, _store: &dyn SpanStore, _old: &CacheSpan, new: &CacheSpan) {
            self.log.lock().push(format!("touch:{}", new));
        }
    }

    fn store_with_listener() -> (MemorySpanStore, Arc<RecordingListener>) {
        let store = MemorySpanStore::new();
        let listener = Arc::new(RecordingListener::default());
        store.set_listener(Some(listener.clone()));
        (store, listener)
    }

    #[test]
    fn test_write_and_read_back() {
        let (store, _) = store_with_listener();
        store.write("k", 0, b"hello ").unwrap();
        store.write("k", 6, b"world").unwrap();

        let data = store.read("k", 2, 100).unwrap().unwrap();
        assert_eq!(&data[..], b"llo world");
        assert_eq!(store.cached_length("k", 0, 100), 11);
        assert_eq!(store.total_bytes(), 11);
        assert_eq!(store.span_count(), 2);
        assert!(store.read("k", 11, 4).unwrap().is_none());
    }

    #[test]
    fn test_longer_write_replaces_shorter_write_touches() {
        let (store, listener) = store_with_listener();
        store.write("k", 0, b"abc").unwrap();
        store.write("k", 0, b"abcdef").unwrap();
        let kept = store.write("k", 0, b"xy").unwrap();

        assert_eq!(kept.length, 6);
        assert_eq!(
            *listener.log.lock(),
            vec![
                "init:0",
                "add:k[0..3)",
                "remove:k[0..3)",
                "add:k[0..6)",
                "touch:k[0..6)",
            ]
        );
        assert_eq!(&store.read("k", 0, 6).unwrap().unwrap()[..], b"abcdef");
    }

    #[test]
    fn test_remove_requires_matching_span() {
        let (store, listener) = store_with_listener();
        let span = store.write("k", 0, b"abcd").unwrap();

        let stale = CacheSpan::new("k", 0, 2);
        assert!(matches!(
            store.remove_span(&stale),
            Err(PlaybackError::SpanNotFound { .. })
        ));

        store.remove_span(&span).unwrap();
        assert_eq!(store.total_bytes(), 0);
        assert!(store.keys().is_empty());
        assert_eq!(listener.log.lock().last().unwrap(), "remove:k[0..4)");
    }

    #[test]
    fn test_set_listener_replays_existing_spans() {
        let store = MemorySpanStore::new();
        store.write("a", 0, b"1").unwrap();
        store.write("b", 0, b"22").unwrap();

        let listener = Arc::new(RecordingListener::default());
        store.set_listener(Some(listener.clone()));

        let log = listener.log.lock();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2], "init:2");
    }

    #[test]
    fn test_empty_write_is_rejected() {
        let store = MemorySpanStore::new();
        assert!(store.write("k", 0, b"").is_err());
    }

    #[test]
    fn test_listener_may_reenter_store() {
        struct Reentrant;
        impl SpanStoreListener for Reentrant {
            fn on_span_added(&self, store: &dyn SpanStore, span: &CacheSpan) {
                // Evicts everything but the span just written.
                for other in store.spans(&span.key) {
                    if other.position != span.position {
                        store.remove_span(&other).unwrap();
                    }
                }
            }
            fn on_span_removed(&self, _store: &dyn SpanStore, _span: &CacheSpan) {}
            fn on_span_touched(&self, _: &dyn SpanStore, _: &CacheSpan, _: &CacheSpan) {}
        }

        let store = MemorySpanStore::new();
        store.set_listener(Some(Arc::new(Reentrant)));
        store.write("k", 0, b"aa").unwrap();
        store.write("k", 2, b"bb").unwrap();

        assert_eq!(store.spans("k"), vec![CacheSpan::new("k", 2, 2)]);
    }
}
