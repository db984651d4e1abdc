//! In-memory span index shared by the store implementations.

use std::collections::{BTreeMap, HashMap};

use super::span::CacheSpan;

/// Spans grouped per key and ordered by position, each carrying a
/// store-specific payload (bytes in memory, a file name on disk).
#[derive(Debug)]
pub(crate) struct SpanIndex<T> {
    keys: HashMap<String, BTreeMap<u64, Entry<T>>>,
    total_bytes: u64,
    span_count: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Entry<T> {
    pub span: CacheSpan,
    pub payload: T,
}

impl<T> Default for SpanIndex<T> {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            total_bytes: 0,
            span_count: 0,
        }
    }
}

impl<T> SpanIndex<T> {
    pub fn get(&self, key: &str, position: u64) -> Option<&Entry<T>> {
        self.keys.get(key)?.get(&position)
    }

    /// Inserts an entry, returning the one previously stored at the same identity.
    pub fn insert(&mut self, span: CacheSpan, payload: T) -> Option<Entry<T>> {
        let length = span.length;
        let previous = self
            .keys
            .entry(span.key.clone())
            .or_default()
            .insert(span.position, Entry { span, payload });

        self.total_bytes = self.total_bytes.saturating_add(length);
        self.span_count += 1;
        if let Some(previous) = &previous {
            self.account_removed(&previous.span);
        }
        previous
    }

    pub fn remove(&mut self, key: &str, position: u64) -> Option<Entry<T>> {
        let spans = self.keys.get_mut(key)?;
        let removed = spans.remove(&position)?;
        if spans.is_empty() {
            self.keys.remove(key);
        }
        self.account_removed(&removed.span);
        Some(removed)
    }

    fn account_removed(&mut self, span: &CacheSpan) {
        self.total_bytes = self.total_bytes.saturating_sub(span.length);
        self.span_count = self.span_count.saturating_sub(1);
    }

    /// Entries that together cover `[position, position + max_length)`
    /// without gaps, in offset order. Stops at the first gap.
    pub fn contiguous(&self, key: &str, position: u64, max_length: u64) -> Vec<&Entry<T>> {
        let mut covering = Vec::new();
        let Some(spans) = self.keys.get(key) else {
            return covering;
        };

        let limit = position.saturating_add(max_length);
        let mut cursor = position;

        while cursor < limit {
            // Of the spans starting at or before the cursor, take the one
            // reaching furthest past it.
            let next = spans
                .range(..=cursor)
                .map(|(_, entry)| entry)
                .filter(|entry| entry.span.end() > cursor)
                .max_by_key(|entry| entry.span.end());

            match next {
                Some(entry) => {
                    cursor = entry.span.end();
                    covering.push(entry);
                }
                None => break,
            }
        }

        covering
    }

    /// Number of contiguous cached bytes starting at `position`, capped at `max_length`.
    pub fn cached_length(&self, key: &str, position: u64, max_length: u64) -> u64 {
        self.contiguous(key, position, max_length)
            .last()
            .map(|entry| entry.span.end().saturating_sub(position).min(max_length))
            .unwrap_or(0)
    }

    pub fn spans(&self, key: &str) -> Vec<CacheSpan> {
        self.keys
            .get(key)
            .map(|spans| spans.values().map(|entry| entry.span.clone()).collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry<T>> {
        self.keys.values().flat_map(|spans| spans.values())
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn span_count(&self) -> usize {
        self.span_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(spans: &[(u64, u64)]) -> SpanIndex<()> {
        let mut index = SpanIndex::default();
        for &(position, length) in spans {
            index.insert(CacheSpan::new("k", position, length), ());
        }
        index
    }

    #[test]
    fn test_cached_length_follows_adjacent_spans() {
        let index = index_with(&[(0, 10), (10, 10), (25, 5)]);
        assert_eq!(index.cached_length("k", 0, 100), 20);
        assert_eq!(index.cached_length("k", 5, 100), 15);
        assert_eq!(index.cached_length("k", 20, 100), 0);
        assert_eq!(index.cached_length("k", 25, 100), 5);
        assert_eq!(index.cached_length("other", 0, 100), 0);
    }

    #[test]
    fn test_cached_length_is_capped() {
        let index = index_with(&[(0, 10), (10, 10)]);
        assert_eq!(index.cached_length("k", 0, 12), 12);
        assert_eq!(index.cached_length("k", 0, 0), 0);
    }

    #[test]
    fn test_overlapping_spans_extend_coverage() {
        let index = index_with(&[(0, 10), (5, 10), (2, 3)]);
        assert_eq!(index.cached_length("k", 0, 100), 15);
        let covering = index.contiguous("k", 0, 100);
        assert_eq!(covering.len(), 2);
        assert_eq!(covering[1].span.position, 5);
    }

    #[test]
    fn test_insert_replaces_same_identity() {
        let mut index = index_with(&[(0, 10)]);
        let previous = index.insert(CacheSpan::new("k", 0, 30), ());

        assert_eq!(previous.unwrap().span.length, 10);
        assert_eq!(index.total_bytes(), 30);
        assert_eq!(index.span_count(), 1);
    }

    #[test]
    fn test_remove_updates_totals_and_drops_empty_keys() {
        let mut index = index_with(&[(0, 10), (10, 5)]);
        assert!(index.remove("k", 0).is_some());
        assert!(index.remove("k", 0).is_none());
        assert_eq!(index.total_bytes(), 5);
        assert_eq!(index.keys(), vec!["k".to_string()]);

        index.remove("k", 10);
        assert!(index.keys().is_empty());
        assert_eq!(index.span_count(), 0);
    }
}
