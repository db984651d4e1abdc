//! Span identity and value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a span: its content key and start offset.
///
/// Two spans with the same identity never coexist in a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanId {
    pub key: String,
    pub position: u64,
}

/// A contiguous byte range of cached content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheSpan {
    /// Normalized content key.
    pub key: String,
    /// Offset of the first byte within the content.
    pub position: u64,
    /// Number of bytes.
    pub length: u64,
}

impl CacheSpan {
    pub fn new(key: impl Into<String>, position: u64, length: u64) -> Self {
        Self {
            key: key.into(),
            position,
            length,
        }
    }

    pub fn id(&self) -> SpanId {
        SpanId {
            key: self.key.clone(),
            position: self.position,
        }
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.position.saturating_add(self.length)
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.position && offset < self.end()
    }
}

impl fmt::Display for CacheSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{})", self.key, self.position, self.end())
    }
}
