//! # Cache Configuration
//!
//! [`CacheConfig`] is the immutable bundle every cache and preload component is
//! built from. It is assembled through [`CacheConfigBuilder`], which replaces
//! invalid values with the documented defaults (logging a warning) instead of
//! failing. Hosts that keep settings on disk can deserialize a
//! [`CacheSettings`] document and convert it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::key::{CacheKeyNormalizer, QueryStrippingNormalizer};

pub const DEFAULT_CACHE_SIZE_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_PRELOAD_SIZE_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_CACHE_ENTRY_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;
pub const DEFAULT_MAX_PARALLEL_PRELOADS: usize = 3;
pub const DEFAULT_CORE_POOL_SIZE: usize = 2;
pub const DEFAULT_MAX_POOL_SIZE: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_METADATA_ENTRIES: usize = 10_000;

/// Immutable cache and preload configuration.
///
/// Shared as `Arc<CacheConfig>` snapshots; updating configuration means
/// building a new value and swapping it in.
#[derive(Clone)]
pub struct CacheConfig {
    cache_size_bytes: u64,
    preload_size_bytes: u64,
    cache_entry_ttl_ms: i64,
    max_parallel_preloads: usize,
    core_pool_size: usize,
    max_pool_size: usize,
    queue_capacity: usize,
    task_timeout: Duration,
    shutdown_grace: Duration,
    max_metadata_entries: usize,
    preload_on_metered: bool,
    key_normalizer: Arc<dyn CacheKeyNormalizer>,
    storage_root: Option<PathBuf>,
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Builder pre-filled with this configuration's values.
    pub fn to_builder(&self) -> CacheConfigBuilder {
        CacheConfigBuilder {
            cache_size_bytes: Some(self.cache_size_bytes),
            preload_size_bytes: Some(self.preload_size_bytes),
            cache_entry_ttl_ms: Some(self.cache_entry_ttl_ms),
            max_parallel_preloads: Some(self.max_parallel_preloads),
            core_pool_size: Some(self.core_pool_size),
            max_pool_size: Some(self.max_pool_size),
            queue_capacity: Some(self.queue_capacity),
            task_timeout: Some(self.task_timeout),
            shutdown_grace: Some(self.shutdown_grace),
            max_metadata_entries: Some(self.max_metadata_entries),
            preload_on_metered: self.preload_on_metered,
            key_normalizer: Some(Arc::clone(&self.key_normalizer)),
            storage_root: self.storage_root.clone(),
        }
    }

    /// Maximum bytes kept on disk.
    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_bytes
    }

    /// Bytes fetched from the start of each preloaded URL.
    pub fn preload_size_bytes(&self) -> u64 {
        self.preload_size_bytes
    }

    /// Age after which an untouched span expires. Zero or negative never expires.
    pub fn cache_entry_ttl_ms(&self) -> i64 {
        self.cache_entry_ttl_ms
    }

    pub fn max_parallel_preloads(&self) -> usize {
        self.max_parallel_preloads
    }

    pub fn core_pool_size(&self) -> usize {
        self.core_pool_size
    }

    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn max_metadata_entries(&self) -> usize {
        self.max_metadata_entries
    }

    /// Whether preloading may run on metered or expensive networks.
    pub fn preload_on_metered(&self) -> bool {
        self.preload_on_metered
    }

    pub fn key_normalizer(&self) -> &Arc<dyn CacheKeyNormalizer> {
        &self.key_normalizer
    }

    /// Normalized cache key for `url`.
    pub fn cache_key(&self, url: &str) -> String {
        self.key_normalizer.generate_key(url)
    }

    /// Directory holding the span store. `None` disables preloading.
    pub fn storage_root(&self) -> Option<&PathBuf> {
        self.storage_root.as_ref()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfigBuilder::default().build()
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("cache_size_bytes", &self.cache_size_bytes)
            .field("preload_size_bytes", &self.preload_size_bytes)
            .field("cache_entry_ttl_ms", &self.cache_entry_ttl_ms)
            .field("max_parallel_preloads", &self.max_parallel_preloads)
            .field("core_pool_size", &self.core_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("task_timeout", &self.task_timeout)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("max_metadata_entries", &self.max_metadata_entries)
            .field("preload_on_metered", &self.preload_on_metered)
            .field("storage_root", &self.storage_root)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CacheConfig`].
///
/// Unset fields take their defaults. Zero values for sizes, counts and
/// durations are rejected with a warning and replaced by the default.
#[derive(Clone, Default)]
pub struct CacheConfigBuilder {
    cache_size_bytes: Option<u64>,
    preload_size_bytes: Option<u64>,
    cache_entry_ttl_ms: Option<i64>,
    max_parallel_preloads: Option<usize>,
    core_pool_size: Option<usize>,
    max_pool_size: Option<usize>,
    queue_capacity: Option<usize>,
    task_timeout: Option<Duration>,
    shutdown_grace: Option<Duration>,
    max_metadata_entries: Option<usize>,
    preload_on_metered: bool,
    key_normalizer: Option<Arc<dyn CacheKeyNormalizer>>,
    storage_root: Option<PathBuf>,
}

impl CacheConfigBuilder {
    pub fn cache_size_bytes(mut self, bytes: u64) -> Self {
        self.cache_size_bytes = Some(bytes);
        self
    }

    pub fn preload_size_bytes(mut self, bytes: u64) -> Self {
        self.preload_size_bytes = Some(bytes);
        self
    }

    pub fn cache_entry_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.cache_entry_ttl_ms = Some(ttl_ms);
        self
    }

    pub fn max_parallel_preloads(mut self, count: usize) -> Self {
        self.max_parallel_preloads = Some(count);
        self
    }

    pub fn core_pool_size(mut self, size: usize) -> Self {
        self.core_pool_size = Some(size);
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    pub fn max_metadata_entries(mut self, count: usize) -> Self {
        self.max_metadata_entries = Some(count);
        self
    }

    pub fn preload_on_metered(mut self, allowed: bool) -> Self {
        self.preload_on_metered = allowed;
        self
    }

    pub fn key_normalizer(mut self, normalizer: Arc<dyn CacheKeyNormalizer>) -> Self {
        self.key_normalizer = Some(normalizer);
        self
    }

    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    pub fn clear_storage_root(mut self) -> Self {
        self.storage_root = None;
        self
    }

    pub fn build(self) -> CacheConfig {
        let core_pool_size = positive("core_pool_size", self.core_pool_size, DEFAULT_CORE_POOL_SIZE);
        let mut max_pool_size = positive("max_pool_size", self.max_pool_size, DEFAULT_MAX_POOL_SIZE);
        if max_pool_size < core_pool_size {
            warn!(
                max_pool_size,
                core_pool_size, "max_pool_size below core_pool_size, raising it"
            );
            max_pool_size = core_pool_size;
        }

        CacheConfig {
            cache_size_bytes: positive(
                "cache_size_bytes",
                self.cache_size_bytes,
                DEFAULT_CACHE_SIZE_BYTES,
            ),
            preload_size_bytes: positive(
                "preload_size_bytes",
                self.preload_size_bytes,
                DEFAULT_PRELOAD_SIZE_BYTES,
            ),
            cache_entry_ttl_ms: self.cache_entry_ttl_ms.unwrap_or(DEFAULT_CACHE_ENTRY_TTL_MS),
            max_parallel_preloads: positive(
                "max_parallel_preloads",
                self.max_parallel_preloads,
                DEFAULT_MAX_PARALLEL_PRELOADS,
            ),
            core_pool_size,
            max_pool_size,
            queue_capacity: positive("queue_capacity", self.queue_capacity, DEFAULT_QUEUE_CAPACITY),
            task_timeout: positive_duration("task_timeout", self.task_timeout, DEFAULT_TASK_TIMEOUT),
            shutdown_grace: positive_duration(
                "shutdown_grace",
                self.shutdown_grace,
                DEFAULT_SHUTDOWN_GRACE,
            ),
            max_metadata_entries: positive(
                "max_metadata_entries",
                self.max_metadata_entries,
                DEFAULT_MAX_METADATA_ENTRIES,
            ),
            preload_on_metered: self.preload_on_metered,
            key_normalizer: self
                .key_normalizer
                .unwrap_or_else(|| Arc::new(QueryStrippingNormalizer)),
            storage_root: self.storage_root,
        }
    }
}

fn positive<T>(field: &'static str, value: Option<T>, default: T) -> T
where
    T: Copy + Default + PartialEq + fmt::Display,
{
    match value {
        Some(v) if v == T::default() => {
            warn!(field, default = %default, "Invalid cache setting, using default");
            default
        }
        Some(v) => v,
        None => default,
    }
}

fn positive_duration(field: &'static str, value: Option<Duration>, default: Duration) -> Duration {
    match value {
        Some(v) if v.is_zero() => {
            warn!(field, default_ms = default.as_millis() as u64, "Invalid cache setting, using default");
            default
        }
        Some(v) => v,
        None => default,
    }
}

// ============================================================================
// Serializable settings
// ============================================================================

/// Serializable configuration surface.
///
/// Numbers are signed so that out-of-range values in a settings file are
/// caught by validation instead of failing deserialization. Missing fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_size_bytes")]
    pub cache_size_bytes: i64,

    #[serde(default = "default_preload_size_bytes")]
    pub preload_size_bytes: i64,

    #[serde(default = "default_max_parallel_preloads")]
    pub max_parallel_preloads: i64,

    #[serde(default = "default_core_pool_size")]
    pub core_pool_size: i64,

    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: i64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: i64,

    /// Zero or negative disables expiry.
    #[serde(default = "default_cache_entry_ttl_ms")]
    pub cache_entry_ttl_ms: i64,

    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: i64,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: i64,

    #[serde(default = "default_max_metadata_entries")]
    pub max_metadata_entries: i64,

    #[serde(default)]
    pub preload_on_metered: bool,

    #[serde(default)]
    pub storage_root: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            cache_size_bytes: default_cache_size_bytes(),
            preload_size_bytes: default_preload_size_bytes(),
            max_parallel_preloads: default_max_parallel_preloads(),
            core_pool_size: default_core_pool_size(),
            max_pool_size: default_max_pool_size(),
            queue_capacity: default_queue_capacity(),
            cache_entry_ttl_ms: default_cache_entry_ttl_ms(),
            task_timeout_ms: default_task_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_metadata_entries: default_max_metadata_entries(),
            preload_on_metered: false,
            storage_root: None,
        }
    }
}

impl CacheSettings {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Converts to a [`CacheConfig`] through the validating builder.
    ///
    /// Negative values become zero and then fall back to their defaults.
    pub fn into_config(self) -> CacheConfig {
        let builder = CacheConfig::builder()
            .cache_size_bytes(non_negative(self.cache_size_bytes))
            .preload_size_bytes(non_negative(self.preload_size_bytes))
            .max_parallel_preloads(non_negative(self.max_parallel_preloads) as usize)
            .core_pool_size(non_negative(self.core_pool_size) as usize)
            .max_pool_size(non_negative(self.max_pool_size) as usize)
            .queue_capacity(non_negative(self.queue_capacity) as usize)
            .cache_entry_ttl_ms(self.cache_entry_ttl_ms)
            .task_timeout(Duration::from_millis(non_negative(self.task_timeout_ms)))
            .shutdown_grace(Duration::from_millis(non_negative(self.shutdown_grace_ms)))
            .max_metadata_entries(non_negative(self.max_metadata_entries) as usize)
            .preload_on_metered(self.preload_on_metered);

        match self.storage_root {
            Some(root) => builder.storage_root(root).build(),
            None => builder.build(),
        }
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            cache_size_bytes: saturating_i64(config.cache_size_bytes),
            preload_size_bytes: saturating_i64(config.preload_size_bytes),
            max_parallel_preloads: saturating_i64(config.max_parallel_preloads as u64),
            core_pool_size: saturating_i64(config.core_pool_size as u64),
            max_pool_size: saturating_i64(config.max_pool_size as u64),
            queue_capacity: saturating_i64(config.queue_capacity as u64),
            cache_entry_ttl_ms: config.cache_entry_ttl_ms,
            task_timeout_ms: saturating_i64(config.task_timeout.as_millis() as u64),
            shutdown_grace_ms: saturating_i64(config.shutdown_grace.as_millis() as u64),
            max_metadata_entries: saturating_i64(config.max_metadata_entries as u64),
            preload_on_metered: config.preload_on_metered,
            storage_root: config.storage_root.clone(),
        }
    }
}

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_cache_size_bytes() -> i64 {
    DEFAULT_CACHE_SIZE_BYTES as i64
}

fn default_preload_size_bytes() -> i64 {
    DEFAULT_PRELOAD_SIZE_BYTES as i64
}

fn default_max_parallel_preloads() -> i64 {
    DEFAULT_MAX_PARALLEL_PRELOADS as i64
}

fn default_core_pool_size() -> i64 {
    DEFAULT_CORE_POOL_SIZE as i64
}

fn default_max_pool_size() -> i64 {
    DEFAULT_MAX_POOL_SIZE as i64
}

fn default_queue_capacity() -> i64 {
    DEFAULT_QUEUE_CAPACITY as i64
}

fn default_cache_entry_ttl_ms() -> i64 {
    DEFAULT_CACHE_ENTRY_TTL_MS
}

fn default_task_timeout_ms() -> i64 {
    DEFAULT_TASK_TIMEOUT.as_millis() as i64
}

fn default_shutdown_grace_ms() -> i64 {
    DEFAULT_SHUTDOWN_GRACE.as_millis() as i64
}

fn default_max_metadata_entries() -> i64 {
    DEFAULT_MAX_METADATA_ENTRIES as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::MockCacheKeyNormalizer;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_size_bytes(), 512 * 1024 * 1024);
        assert_eq!(config.preload_size_bytes(), 1024 * 1024);
        assert_eq!(config.cache_entry_ttl_ms(), 604_800_000);
        assert_eq!(config.max_parallel_preloads(), 3);
        assert_eq!(config.core_pool_size(), 2);
        assert_eq!(config.max_pool_size(), 4);
        assert_eq!(config.queue_capacity(), 16);
        assert_eq!(config.task_timeout(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(3));
        assert_eq!(config.max_metadata_entries(), 10_000);
        assert!(!config.preload_on_metered());
        assert!(config.storage_root().is_none());
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = CacheConfig::builder()
            .cache_size_bytes(0)
            .max_parallel_preloads(0)
            .queue_capacity(0)
            .task_timeout(Duration::ZERO)
            .build();

        assert_eq!(config.cache_size_bytes(), DEFAULT_CACHE_SIZE_BYTES);
        assert_eq!(config.max_parallel_preloads(), DEFAULT_MAX_PARALLEL_PRELOADS);
        assert_eq!(config.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.task_timeout(), DEFAULT_TASK_TIMEOUT);
    }

    #[test]
    fn test_max_pool_size_is_raised_to_core() {
        let config = CacheConfig::builder()
            .core_pool_size(6)
            .max_pool_size(2)
            .build();
        assert_eq!(config.core_pool_size(), 6);
        assert_eq!(config.max_pool_size(), 6);
    }

    #[test]
    fn test_non_positive_ttl_is_kept() {
        let config = CacheConfig::builder().cache_entry_ttl_ms(-1).build();
        assert_eq!(config.cache_entry_ttl_ms(), -1);
    }

    #[test]
    fn test_to_builder_round_trips_overrides() {
        let config = CacheConfig::builder()
            .cache_size_bytes(1000)
            .storage_root("/tmp/media-cache")
            .build();
        let updated = config.to_builder().preload_size_bytes(10).build();

        assert_eq!(updated.cache_size_bytes(), 1000);
        assert_eq!(updated.preload_size_bytes(), 10);
        assert_eq!(
            updated.storage_root(),
            Some(&PathBuf::from("/tmp/media-cache"))
        );
        assert!(updated.to_builder().clear_storage_root().build().storage_root().is_none());
    }

    #[test]
    fn test_custom_normalizer_is_used() {
        let mut normalizer = MockCacheKeyNormalizer::new();
        normalizer
            .expect_generate_key()
            .returning(|url| format!("key:{}", url.len()));

        let config = CacheConfig::builder()
            .key_normalizer(Arc::new(normalizer))
            .build();
        assert_eq!(config.cache_key("abc"), "key:3");
    }

    #[test]
    fn test_settings_from_json_with_missing_fields() {
        let settings = CacheSettings::from_json(
            r#"{ "cache_size_bytes": 2048, "task_timeout_ms": 500, "storage_root": "/data/cache" }"#,
        )
        .unwrap();
        assert_eq!(settings.max_parallel_preloads, 3);

        let config = settings.into_config();
        assert_eq!(config.cache_size_bytes(), 2048);
        assert_eq!(config.task_timeout(), Duration::from_millis(500));
        assert_eq!(config.storage_root(), Some(&PathBuf::from("/data/cache")));
    }

    #[test]
    fn test_negative_settings_use_defaults() {
        let settings = CacheSettings {
            cache_size_bytes: -5,
            core_pool_size: -1,
            cache_entry_ttl_ms: -1,
            ..Default::default()
        };
        let config = settings.into_config();
        assert_eq!(config.cache_size_bytes(), DEFAULT_CACHE_SIZE_BYTES);
        assert_eq!(config.core_pool_size(), DEFAULT_CORE_POOL_SIZE);
        assert_eq!(config.cache_entry_ttl_ms(), -1);
    }

    #[test]
    fn test_settings_from_config() {
        let config = CacheConfig::builder().max_metadata_entries(7).build();
        let settings = CacheSettings::from(&config);
        assert_eq!(settings.max_metadata_entries, 7);
        assert_eq!(settings.shutdown_grace_ms, 3000);
        assert_eq!(settings.into_config().max_metadata_entries(), 7);
    }
}
