//! Cache statistics and monitoring

use serde::Serialize;

use super::evictor::EvictorStats;

/// Point-in-time statistics about the span cache and preloading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Bytes held by the span store
    pub total_bytes: u64,

    /// Number of spans held by the span store
    pub span_count: usize,

    /// Number of distinct content keys
    pub key_count: usize,

    /// Configured byte capacity
    pub capacity_bytes: u64,

    /// Preload tasks currently in flight
    pub live_preloads: usize,

    /// Evictor bookkeeping and counters
    pub evictor: EvictorStats,
}

impl CacheStats {
    /// Cache usage as a percentage of capacity.
    pub fn usage_percentage(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / self.capacity_bytes as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    /// Returns true if the cache is full (>=100%).
    pub fn is_full(&self) -> bool {
        self.capacity_bytes > 0 && self.total_bytes >= self.capacity_bytes
    }

    /// Bytes above capacity that eviction still has to free.
    pub fn space_needed(&self) -> u64 {
        self.total_bytes.saturating_sub(self.capacity_bytes)
    }

    /// Returns average bytes per span.
    pub fn average_span_size(&self) -> u64 {
        if self.span_count == 0 {
            0
        } else {
            self.total_bytes / self.span_count as u64
        }
    }
}
