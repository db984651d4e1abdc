//! # Prefetch Demo
//!
//! Preloads a few "tracks" from an in-process HTTP fake into a temporary
//! disk cache small enough to force eviction, then prints cache statistics.
//!
//! Run with: `cargo run --example prefetch_demo --package core-playback`

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{ByteRange, HttpClient, HttpRequest, HttpResponse, RangeStream};
use bridge_traits::network::{NetworkInfo, NetworkMonitor, NetworkQuality, NetworkType};
use core_playback::{CacheConfig, PrefetchService, PreloadListener};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// In-process bridges (for demonstration)
// ============================================================================

/// Serves every URL as 64 KiB of synthetic audio bytes.
struct SyntheticHttpClient;

#[async_trait]
impl HttpClient for SyntheticHttpClient {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Err(BridgeError::NotAvailable("demo client only streams".to_string()))
    }

    async fn download_range(&self, _url: String, range: ByteRange) -> BridgeResult<RangeStream> {
        const LEN: u64 = 64 * 1024;
        let start = range.start.min(LEN);
        let end = range.end.unwrap_or(LEN).min(LEN);
        let body: Vec<u8> = (start..end).map(|i| (i % 256) as u8).collect();

        // Pretend to be a slowish CDN.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Ok(RangeStream {
            status: 206,
            content_length: Some(body.len() as u64),
            reader: Box::new(std::io::Cursor::new(body)),
        })
    }
}

struct AlwaysWifi;

#[async_trait]
impl NetworkMonitor for AlwaysWifi {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(NetworkInfo::connected(NetworkType::WiFi).with_quality(NetworkQuality::Good))
    }
}

struct PrintingListener;

impl PreloadListener for PrintingListener {
    fn on_preload_success(&self, url: &str) {
        println!("  ✓ preloaded {url}");
    }

    fn on_preload_failed(&self, url: &str, message: &str) {
        println!("  ✗ {url}: {message}");
    }

    fn on_preload_canceled(&self, url: &str) {
        println!("  - canceled {url}");
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::default().with_format(LogFormat::Compact))?;

    let dir = tempfile::tempdir()?;
    let config = CacheConfig::builder()
        .storage_root(dir.path())
        .preload_size_bytes(32 * 1024)
        .cache_size_bytes(100 * 1024)
        .max_parallel_preloads(2)
        .build();

    let service = PrefetchService::builder(config, Arc::new(SyntheticHttpClient), Arc::new(AlwaysWifi))
        .listener(Arc::new(PrintingListener))
        .event_bus(EventBus::new(256))
        .build()
        .await?;
    let mut evictions = service
        .events()
        .ok_or("service was built without an event bus")?
        .filter(|event| matches!(event, CoreEvent::Cache(CacheEvent::SpanEvicted { .. })));

    let queue: Vec<String> = (1..=5)
        .map(|n| format!("https://cdn.example.com/track-{n}.mp3?token=secret"))
        .collect();

    println!("=== Prefetching {} tracks, two at a time ===", queue.len());
    for round in 0..queue.len() {
        let outcome = service.reconcile(&queue[round..]).await;
        println!("round {round}: {outcome:?}");
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    let stats = service.stats();
    println!("\n=== Cache ===");
    println!("  spans:      {}", stats.span_count);
    println!("  bytes:      {} / {}", stats.total_bytes, stats.capacity_bytes);
    println!("  usage:      {:.1}%", stats.usage_percentage());
    println!("  evictions:  {}", stats.evictor.total_evictions());
    for url in &queue {
        println!("  {url}: cached={}", service.is_fully_cached(url));
    }

    println!("\n=== Evictions ===");
    while let Some(Ok(event)) = evictions.try_recv() {
        if let CoreEvent::Cache(CacheEvent::SpanEvicted {
            key,
            position,
            length,
            reason,
        }) = event
        {
            println!("  {key} @{position} ({length} bytes): {reason:?}");
        }
    }

    service.shutdown().await;
    Ok(())
}
