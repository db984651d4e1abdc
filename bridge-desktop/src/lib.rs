//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with HTTP range requests streamed as
//!   `AsyncRead`
//! - `NetworkMonitor` using a cached TCP reachability probe whose connect
//!   latency drives the reported link quality
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopNetworkMonitor, ReqwestHttpClient};
//! use bridge_traits::{ByteRange, HttpClient, NetworkMonitor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let monitor = DesktopNetworkMonitor::new();
//!
//!     if monitor.is_connected().await {
//!         let stream = http_client
//!             .download_range("https://cdn.example.com/a.mp3".into(), ByteRange::new(0, 1 << 20))
//!             .await;
//!     }
//! }
//! ```

mod http;
mod network;

pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;
