//! # Playback Error Types
//!
//! Error types for the span cache and the prefetch pipeline.

use bridge_traits::error::BridgeError;
use thiserror::Error;

use crate::preload::pool::PoolError;

/// Errors that can occur in cache and preload operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Cache Errors
    // ========================================================================
    /// Span store operation failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// No span with this identity is stored.
    #[error("Span not found: {key} @ {position}")]
    SpanNotFound { key: String, position: u64 },

    /// The persisted span index could not be read or written.
    #[error("Cache index corrupted: {0}")]
    IndexCorrupted(String),

    // ========================================================================
    // Preload Errors
    // ========================================================================
    /// Fetching content for a preload failed.
    #[error("Preload failed: {0}")]
    PreloadFailed(String),

    /// A preload exceeded its time budget.
    #[error("preload timed out after {0} ms")]
    Timeout(u64),

    /// The operation was canceled.
    #[error("Operation canceled")]
    Canceled,

    /// The worker pool refused a job.
    #[error("Worker pool error: {0}")]
    PoolError(#[from] PoolError),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Host bridge capability failed.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::Timeout(_) | PlaybackError::PreloadFailed(_) => true,
            PlaybackError::PoolError(PoolError::Saturated) => true,
            PlaybackError::Bridge(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::Bridge(_) | PlaybackError::Timeout(_) | PlaybackError::PreloadFailed(_)
        )
    }
}

impl From<serde_json::Error> for PlaybackError {
    fn from(e: serde_json::Error) -> Self {
        PlaybackError::IndexCorrupted(e.to_string())
    }
}

impl From<core_async::task::JoinError> for PlaybackError {
    fn from(e: core_async::task::JoinError) -> Self {
        if e.is_cancelled() {
            PlaybackError::Canceled
        } else {
            PlaybackError::Internal(format!("background task panicked: {}", e))
        }
    }
}

/// Result type for cache and preload operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
