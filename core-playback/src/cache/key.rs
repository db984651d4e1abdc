//! Cache key normalization.
//!
//! Media URLs usually carry expiring signatures or session parameters in the
//! query string. The cache must address content by a stable identity, so
//! every URL passes through a [`CacheKeyNormalizer`] before it touches the
//! span store.

use std::fmt;

/// Maps a raw content URL to a stable cache key.
///
/// Implementations must be deterministic: the same URL always yields the
/// same key.
#[cfg_attr(test, mockall::automock)]
pub trait CacheKeyNormalizer: Send + Sync {
    fn generate_key(&self, url: &str) -> String;
}

/// Default normalizer: drops everything from the first `?` or `#` onward.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryStrippingNormalizer;

impl CacheKeyNormalizer for QueryStrippingNormalizer {
    fn generate_key(&self, url: &str) -> String {
        match url.find(['?', '#']) {
            Some(idx) => url[..idx].to_string(),
            None => url.to_string(),
        }
    }
}

/// Uses the URL verbatim as its key.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityNormalizer;

impl CacheKeyNormalizer for IdentityNormalizer {
    fn generate_key(&self, url: &str) -> String {
        url.to_string()
    }
}

impl fmt::Debug for dyn CacheKeyNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CacheKeyNormalizer")
    }
}
