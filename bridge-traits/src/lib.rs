//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the prefetch core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that must be implemented differently per platform.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP with ranged streaming downloads
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity, metered and quality detection
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing ([`ManualClock`](time::ManualClock))
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | Mobile / embedded | injected by the host |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report non-success HTTP statuses as [`BridgeError::HttpStatus`]
//! - Include error context (URLs, status codes)
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{ByteRange, HttpClient, HttpRequest, HttpResponse, RangeStream};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         todo!()
//!     }
//!
//!     async fn download_range(&self, url: String, range: ByteRange) -> Result<RangeStream> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod network;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{
    ByteRange, HttpClient, HttpMethod, HttpRequest, HttpResponse, RangeStream, RetryPolicy,
};
pub use network::{NetworkInfo, NetworkMonitor, NetworkQuality, NetworkStatus, NetworkType};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
