//! Least-recently-used eviction policy for span stores.
//!
//! [`LruSpanEvictor`] listens to a [`SpanStore`] and enforces three bounds
//! after every addition, in this order:
//!
//! 1. **Age**: spans untouched for longer than the TTL expire.
//! 2. **Size**: least recently used spans go while total bytes exceed capacity.
//! 3. **Metadata**: least recently used spans go while too many are tracked.
//!
//! Victims are planned under the evictor lock and removed through the store
//! after the lock is released. Each removal comes back through
//! [`SpanStoreListener::on_span_removed`], which is where bookkeeping shrinks.
//!
//! Store events may arrive out of order when one identity is mutated
//! concurrently, so every event is checked against [`SpanStore::contains`]
//! under the evictor lock before the index follows it. A removal event for a
//! span that has since been written again is dropped, as is an addition for a
//! span that is already gone.

use bridge_traits::time::{Clock, SystemClock};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, EvictionReason};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::span::{CacheSpan, SpanId};
use super::store::{SpanStore, SpanStoreListener};
use crate::config::CacheConfig;
use crate::error::PlaybackError;

/// Bounds enforced by the evictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionLimits {
    pub capacity_bytes: u64,
    /// Zero or negative disables expiry.
    pub ttl_ms: i64,
    pub max_entries: usize,
}

impl From<&CacheConfig> for EvictionLimits {
    fn from(config: &CacheConfig) -> Self {
        Self {
            capacity_bytes: config.cache_size_bytes(),
            ttl_ms: config.cache_entry_ttl_ms(),
            max_entries: config.max_metadata_entries(),
        }
    }
}

/// Snapshot of evictor bookkeeping and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictorStats {
    pub tracked_bytes: u64,
    pub tracked_spans: usize,
    pub expired_evictions: u64,
    pub capacity_evictions: u64,
    pub metadata_evictions: u64,
    /// Planned removals the store refused.
    pub removal_failures: u64,
}

impl EvictorStats {
    pub fn total_evictions(&self) -> u64 {
        self.expired_evictions + self.capacity_evictions + self.metadata_evictions
    }
}

#[derive(Debug)]
struct Tracked {
    span: CacheSpan,
    last_access_ms: i64,
}

struct EvictorState {
    /// Most recently touched first.
    index: LruCache<SpanId, Tracked>,
    current_size: u64,
    limits: EvictionLimits,
    stats: EvictorStats,
}

impl EvictorState {
    fn record(&mut self, span: &CacheSpan, now_ms: i64) {
        let tracked = Tracked {
            span: span.clone(),
            last_access_ms: now_ms,
        };
        if let Some(previous) = self.index.put(span.id(), tracked) {
            self.current_size = self.current_size.saturating_sub(previous.span.length);
        }
        self.current_size = self.current_size.saturating_add(span.length);
    }

    fn forget(&mut self, span: &CacheSpan) -> bool {
        let id = span.id();
        let matches = self
            .index
            .peek(&id)
            .is_some_and(|tracked| tracked.span.length == span.length);
        if !matches {
            return false;
        }
        if let Some(tracked) = self.index.pop(&id) {
            self.current_size = self.current_size.saturating_sub(tracked.span.length);
        }
        true
    }

    /// Victims in eviction order. Does not mutate the index.
    ///
    /// Spans in `skip` stay counted against the bounds but are never picked.
    fn plan(&self, now_ms: i64, skip: &[CacheSpan]) -> Vec<(CacheSpan, EvictionReason)> {
        let EvictionLimits {
            capacity_bytes,
            ttl_ms,
            max_entries,
        } = self.limits;

        let mut victims = Vec::new();
        let mut projected_size = self.current_size;
        let mut projected_count = self.index.len();
        let mut lru_first = self
            .index
            .iter()
            .rev()
            .map(|(_, tracked)| tracked)
            .filter(|tracked| !skip.contains(&tracked.span))
            .peekable();

        if ttl_ms > 0 {
            while let Some(tracked) =
                lru_first.next_if(|t| now_ms.saturating_sub(t.last_access_ms) > ttl_ms)
            {
                projected_size = projected_size.saturating_sub(tracked.span.length);
                projected_count -= 1;
                victims.push((tracked.span.clone(), EvictionReason::Expired));
            }
        }

        while projected_size > capacity_bytes {
            let Some(tracked) = lru_first.next() else {
                break;
            };
            projected_size = projected_size.saturating_sub(tracked.span.length);
            projected_count -= 1;
            victims.push((tracked.span.clone(), EvictionReason::Capacity));
        }

        while projected_count > max_entries {
            let Some(tracked) = lru_first.next() else {
                break;
            };
            projected_count -= 1;
            victims.push((tracked.span.clone(), EvictionReason::MetadataLimit));
        }

        victims
    }

    fn count_eviction(&mut self, reason: EvictionReason) {
        match reason {
            EvictionReason::Expired => self.stats.expired_evictions += 1,
            EvictionReason::Capacity => self.stats.capacity_evictions += 1,
            EvictionReason::MetadataLimit => self.stats.metadata_evictions += 1,
        }
    }
}

/// LRU evictor bounding bytes, span age and tracked span count.
///
/// Register it with [`SpanStore::set_listener`]; the store then replays its
/// existing spans and reports every later mutation.
pub struct LruSpanEvictor {
    state: Mutex<EvictorState>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
}

impl LruSpanEvictor {
    pub fn new(limits: EvictionLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: EvictionLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(EvictorState {
                index: LruCache::unbounded(),
                current_size: 0,
                limits,
                stats: EvictorStats::default(),
            }),
            clock,
            event_bus: None,
        }
    }

    /// Publishes a [`CacheEvent::SpanEvicted`] for every successful eviction.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn limits(&self) -> EvictionLimits {
        self.state.lock().limits
    }

    /// Replaces the bounds. They take effect on the next addition or trim.
    pub fn update_limits(&self, limits: EvictionLimits) {
        self.state.lock().limits = limits;
    }

    /// Bytes currently tracked.
    pub fn current_size(&self) -> u64 {
        self.state.lock().current_size
    }

    pub fn stats(&self) -> EvictorStats {
        let state = self.state.lock();
        EvictorStats {
            tracked_bytes: state.current_size,
            tracked_spans: state.index.len(),
            ..state.stats.clone()
        }
    }

    /// Drops all tracked spans, e.g. before attaching to a different store.
    /// Counters are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.index.clear();
        state.current_size = 0;
    }

    /// Enforces the current bounds without waiting for an addition.
    ///
    /// Returns the number of spans removed.
    #[instrument(skip_all)]
    pub fn trim_to_capacity(&self, store: &dyn SpanStore) -> usize {
        let victims = {
            let state = self.state.lock();
            state.plan(self.now_ms(), &[])
        };
        self.evict(store, victims)
    }

    fn now_ms(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Tracks `span` as most recent if the store still holds it, then evicts.
    ///
    /// The store is consulted under the state lock: a mutation racing this
    /// call either is visible here or reports after the lock is released.
    fn record_and_evict(
        &self,
        store: &dyn SpanStore,
        old: Option<&CacheSpan>,
        span: &CacheSpan,
    ) {
        let victims = {
            let mut state = self.state.lock();
            if let Some(old) = old {
                state.forget(old);
            }
            if !store.contains(span) {
                state.forget(span);
                return;
            }
            let now = self.now_ms();
            state.record(span, now);
            state.plan(now, &[])
        };
        self.evict(store, victims);
    }

    /// Removes `victims`. A failed removal leaves its span indexed and the
    /// remaining work is re-planned around it, so the size and metadata
    /// passes move on to the next candidate within the same cycle.
    fn evict(
        &self,
        store: &dyn SpanStore,
        mut victims: Vec<(CacheSpan, EvictionReason)>,
    ) -> usize {
        let mut evicted = 0;
        let mut failed: Vec<CacheSpan> = Vec::new();
        loop {
            let mut replan = false;
            for (span, reason) in victims {
                match store.remove_span(&span) {
                    Ok(()) => {
                        evicted += 1;
                        self.state.lock().count_eviction(reason);
                        debug!(key = %span.key, position = span.position, length = span.length, ?reason, "Span evicted");
                        self.publish(&span, reason);
                    }
                    Err(PlaybackError::SpanNotFound { .. }) => {
                        debug!(key = %span.key, position = span.position, "Eviction victim already gone");
                        let mut state = self.state.lock();
                        if !store.contains(&span) {
                            state.forget(&span);
                        }
                    }
                    Err(e) => {
                        self.state.lock().stats.removal_failures += 1;
                        warn!(key = %span.key, position = span.position, error = %e, "Failed to evict span");
                        failed.push(span);
                        replan = true;
                        break;
                    }
                }
            }
            if !replan {
                return evicted;
            }
            victims = self.state.lock().plan(self.now_ms(), &failed);
        }
    }

    fn publish(&self, span: &CacheSpan, reason: EvictionReason) {
        if let Some(bus) = &self.event_bus {
            // No subscribers is not an error.
            let _ = bus.emit(CoreEvent::Cache(CacheEvent::SpanEvicted {
                key: span.key.clone(),
                position: span.position,
                length: span.length,
                reason,
            }));
        }
    }
}

impl SpanStoreListener for LruSpanEvictor {
    fn requires_touch_notifications(&self) -> bool {
        true
    }

    fn on_initialized(&self, store: &dyn SpanStore) {
        let evicted = self.trim_to_capacity(store);
        debug!(
            tracked_bytes = self.current_size(),
            evicted, "Evictor initialized"
        );
    }

    fn on_span_added(&self, store: &dyn SpanStore, span: &CacheSpan) {
        self.record_and_evict(store, None, span);
    }

    fn on_span_removed(&self, store: &dyn SpanStore, span: &CacheSpan) {
        let mut state = self.state.lock();
        // Stale when the span was written again before this event arrived.
        if !store.contains(span) {
            state.forget(span);
        }
    }

    fn on_span_touched(&self, store: &dyn SpanStore, old: &CacheSpan, new: &CacheSpan) {
        self.record_and_evict(store, Some(old), new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_store::MemorySpanStore;
    use bridge_traits::time::ManualClock;

    const MB: u64 = 1024 * 1024;

    fn limits(capacity_bytes: u64, ttl_ms: i64, max_entries: usize) -> EvictionLimits {
        EvictionLimits {
            capacity_bytes,
            ttl_ms,
            max_entries,
        }
    }

    fn attach(
        limits: EvictionLimits,
    ) -> (Arc<MemorySpanStore>, Arc<LruSpanEvictor>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::from_millis(1_000_000));
        let evictor = Arc::new(LruSpanEvictor::with_clock(limits, clock.clone()));
        let store = Arc::new(MemorySpanStore::new());
        store.set_listener(Some(evictor.clone()));
        (store, evictor, clock)
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let (store, evictor, clock) = attach(limits(30, 0, 100));

        store.write("a", 0, &[0; 10]).unwrap();
        clock.advance_millis(1);
        store.write("b", 0, &[0; 10]).unwrap();
        clock.advance_millis(1);
        store.write("c", 0, &[0; 10]).unwrap();
        clock.advance_millis(1);

        // Touch "a" so "b" becomes the oldest.
        store.read("a", 0, 10).unwrap();
        store.write("d", 0, &[0; 10]).unwrap();

        assert_eq!(store.keys(), vec!["a", "c", "d"]);
        let stats = evictor.stats();
        assert_eq!(stats.tracked_bytes, 30);
        assert_eq!(stats.capacity_evictions, 1);
    }

    #[test]
    fn test_expired_spans_go_first() {
        let (store, evictor, clock) = attach(limits(u64::MAX, 1_000, 100));

        store.write("old", 0, &[0; 4]).unwrap();
        clock.advance_millis(600);
        store.write("young", 0, &[0; 4]).unwrap();
        clock.advance_millis(600);
        store.write("new", 0, &[0; 4]).unwrap();

        assert_eq!(store.keys(), vec!["new", "young"]);
        assert_eq!(evictor.stats().expired_evictions, 1);
    }

    #[test]
    fn test_ttl_disabled_when_not_positive() {
        let (store, _evictor, clock) = attach(limits(u64::MAX, 0, 100));
        store.write("a", 0, &[0; 4]).unwrap();
        clock.advance_millis(i64::from(u32::MAX));
        store.write("b", 0, &[0; 4]).unwrap();
        assert_eq!(store.span_count(), 2);
    }

    #[test]
    fn test_metadata_limit_caps_entries() {
        let (store, evictor, _clock) = attach(limits(u64::MAX, 0, 2));
        for position in 0..5u64 {
            store.write("k", position * 10, &[0; 10]).unwrap();
        }
        assert_eq!(store.span_count(), 2);
        assert_eq!(
            store.spans("k").iter().map(|s| s.position).collect::<Vec<_>>(),
            vec![30, 40]
        );
        assert_eq!(evictor.stats().metadata_evictions, 3);
    }

    #[test]
    fn test_replacement_keeps_size_consistent() {
        let (store, evictor, _clock) = attach(limits(u64::MAX, 0, 100));
        store.write("k", 0, &[0; 10]).unwrap();
        store.write("k", 0, &[0; 25]).unwrap();
        store.write("k", 0, &[0; 5]).unwrap();

        assert_eq!(evictor.current_size(), 25);
        assert_eq!(evictor.stats().tracked_spans, 1);
    }

    #[test]
    fn test_unknown_removal_is_ignored() {
        let (store, evictor, _clock) = attach(limits(u64::MAX, 0, 100));
        store.write("k", 0, &[0; 10]).unwrap();

        evictor.on_span_removed(store.as_ref(), &CacheSpan::new("other", 0, 10));
        evictor.on_span_removed(store.as_ref(), &CacheSpan::new("k", 0, 3));
        assert_eq!(evictor.current_size(), 10);
    }

    #[test]
    fn test_removal_event_for_stored_span_is_stale() {
        let (store, evictor, _clock) = attach(limits(u64::MAX, 0, 100));
        let span = store.write("k", 0, &[0; 10]).unwrap();

        // The store still holds the span, so this event lost a race with a rewrite.
        evictor.on_span_removed(store.as_ref(), &span);
        assert_eq!(evictor.current_size(), 10);
        assert_eq!(evictor.stats().tracked_spans, 1);

        let ghost = CacheSpan::new("ghost", 0, 10);
        evictor.on_span_added(store.as_ref(), &ghost);
        assert_eq!(evictor.stats().tracked_spans, 1);
    }

    #[test]
    fn test_update_limits_then_trim() {
        let (store, evictor, clock) = attach(limits(u64::MAX, 0, 100));
        for key in ["a", "b", "c"] {
            store.write(key, 0, &[0; 10]).unwrap();
            clock.advance_millis(1);
        }

        evictor.update_limits(limits(15, 0, 100));
        assert_eq!(store.span_count(), 3);
        assert_eq!(evictor.trim_to_capacity(store.as_ref()), 2);
        assert_eq!(store.keys(), vec!["c"]);
    }

    #[test]
    fn test_replayed_spans_are_trimmed_on_initialize() {
        let store = MemorySpanStore::new();
        for key in ["a", "b", "c"] {
            store.write(key, 0, &[0; 10]).unwrap();
        }

        let evictor = Arc::new(LruSpanEvictor::new(limits(20, 0, 100)));
        store.set_listener(Some(evictor.clone()));

        assert_eq!(store.total_bytes(), 20);
        assert_eq!(evictor.current_size(), 20);
    }

    #[test]
    fn test_reset_clears_tracking() {
        let (store, evictor, _clock) = attach(limits(u64::MAX, 0, 100));
        store.write("k", 0, &[0; 10]).unwrap();
        evictor.reset();
        let stats = evictor.stats();
        assert_eq!(stats.tracked_bytes, 0);
        assert_eq!(stats.tracked_spans, 0);
    }

    #[tokio::test]
    async fn test_evictions_are_published() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let evictor = Arc::new(LruSpanEvictor::new(limits(MB, 0, 100)).with_event_bus(bus));
        let store = MemorySpanStore::new();
        store.set_listener(Some(evictor.clone()));

        store.write("a", 0, &vec![0; MB as usize]).unwrap();
        store.write("b", 0, &[0; 1]).unwrap();

        match rx.recv().await.unwrap() {
            CoreEvent::Cache(CacheEvent::SpanEvicted { key, reason, .. }) => {
                assert_eq!(key, "a");
                assert_eq!(reason, EvictionReason::Capacity);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
