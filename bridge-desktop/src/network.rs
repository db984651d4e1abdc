//! Network Monitoring Implementation

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    network::{NetworkInfo, NetworkMonitor, NetworkQuality, NetworkStatus, NetworkType},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_PROBE_ADDR: ([u8; 4], u16) = ([8, 8, 8, 8], 53);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);
const DEFAULT_POOR_LATENCY: Duration = Duration::from_millis(300);

/// Desktop network monitor implementation
///
/// Probes connectivity with a TCP connect to a well-known endpoint and
/// derives [`NetworkQuality`] from the connect latency. Results are cached
/// for a short TTL so that frequent prefetch reconciliations do not open a
/// socket each time.
///
/// Note: Platform-specific implementations (Linux netlink, macOS SystemConfiguration,
/// Windows WinAPI) would be more robust but require additional dependencies.
pub struct DesktopNetworkMonitor {
    probe_addr: SocketAddr,
    probe_timeout: Duration,
    cache_ttl: Duration,
    poor_latency: Duration,
    cached_info: Arc<Mutex<Option<(Instant, NetworkInfo)>>>,
}

impl DesktopNetworkMonitor {
    /// Create a new network monitor
    pub fn new() -> Self {
        Self::with_probe(SocketAddr::from(DEFAULT_PROBE_ADDR), DEFAULT_CACHE_TTL)
    }

    /// Create a monitor probing `probe_addr`, caching results for `cache_ttl`
    pub fn with_probe(probe_addr: SocketAddr, cache_ttl: Duration) -> Self {
        Self {
            probe_addr,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            cache_ttl,
            poor_latency: DEFAULT_POOR_LATENCY,
            cached_info: Arc::new(Mutex::new(None)),
        }
    }

    /// Connect latency above which the link is reported as [`NetworkQuality::Poor`]
    pub fn poor_latency_threshold(mut self, threshold: Duration) -> Self {
        self.poor_latency = threshold;
        self
    }

    /// Drop the cached probe result so the next query probes again
    pub async fn invalidate(&self) {
        self.cached_info.lock().await.take();
    }

    /// Check network connectivity by opening a TCP connection to the probe address
    async fn probe(&self) -> NetworkInfo {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.probe_timeout,
            tokio::net::TcpStream::connect(self.probe_addr),
        )
        .await;

        match outcome {
            Ok(Ok(_)) => {
                let latency = started.elapsed();
                let quality = if latency > self.poor_latency {
                    NetworkQuality::Poor
                } else {
                    NetworkQuality::Good
                };
                debug!(latency_ms = latency.as_millis() as u64, ?quality, "Network probe succeeded");

                // Desktop links are assumed unmetered; Ethernet and WiFi
                // cannot be told apart without platform-specific APIs.
                NetworkInfo::connected(NetworkType::Other)
                    .with_metered(false)
                    .with_quality(quality)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Network probe failed");
                NetworkInfo::disconnected()
            }
            Err(_) => {
                debug!("Network probe timed out");
                NetworkInfo::disconnected()
            }
        }
    }
}

impl Default for DesktopNetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkMonitor for DesktopNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        let mut cached = self.cached_info.lock().await;

        if let Some((probed_at, info)) = cached.as_ref() {
            if probed_at.elapsed() < self.cache_ttl {
                return Ok(info.clone());
            }
        }

        let info = self.probe().await;
        *cached = Some((Instant::now(), info.clone()));
        debug!(status = ?info.status, "Network info updated");

        Ok(info)
    }

    async fn is_wifi(&self) -> bool {
        // Desktop implementation doesn't distinguish network types
        false
    }

    async fn is_metered(&self) -> bool {
        false
    }
}
