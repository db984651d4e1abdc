//! Network Monitoring Abstraction
//!
//! Provides network connectivity, cost and quality information.

use crate::error::Result;

/// Network connection type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    /// Cellular/mobile data connection
    Cellular,
    /// WiFi connection
    WiFi,
    /// Ethernet connection
    Ethernet,
    /// Other or unknown connection type
    Other,
}

/// Network connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    /// Connected to network
    Connected,
    /// Not connected to any network
    Disconnected,
    /// Connection status unknown or indeterminate
    Indeterminate,
}

/// Coarse link quality estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkQuality {
    Good,
    /// High latency or low bandwidth; background work should back off.
    Poor,
    #[default]
    Unknown,
}

/// Network information
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Whether the connection is metered (has data limits/costs)
    pub is_metered: bool,
    /// Whether the connection is considered expensive by the OS
    pub is_expensive: bool,
    pub quality: NetworkQuality,
}

impl NetworkInfo {
    /// Connected, unmetered network of the given type with unknown quality.
    pub fn connected(network_type: NetworkType) -> Self {
        Self {
            status: NetworkStatus::Connected,
            network_type: Some(network_type),
            is_metered: matches!(network_type, NetworkType::Cellular),
            is_expensive: false,
            quality: NetworkQuality::Unknown,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
            is_expensive: false,
            quality: NetworkQuality::Unknown,
        }
    }

    pub fn with_quality(mut self, quality: NetworkQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_metered(mut self, metered: bool) -> Self {
        self.is_metered = metered;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.status == NetworkStatus::Connected
    }

    /// Metered or expensive: background downloads should ask first.
    pub fn is_costly(&self) -> bool {
        self.is_metered || self.is_expensive
    }
}

/// Network monitor trait
///
/// Provides network connectivity information to allow the core to:
/// - Skip prefetching when offline
/// - Avoid speculative downloads on metered connections
/// - Reduce parallelism on poor links
///
/// # Example
///
/// ```ignore
/// use bridge_traits::network::NetworkMonitor;
///
/// async fn should_prefetch(monitor: &dyn NetworkMonitor) -> bool {
///     let info = monitor.get_network_info().await.ok()?;
///     info.is_connected() && !info.is_costly()
/// }
/// ```
#[async_trait::async_trait]
pub trait NetworkMonitor: Send + Sync {
    /// Get current network information
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    /// Check if currently connected to any network
    async fn is_connected(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                ..
            })
        )
    }

    /// Check if connected via WiFi
    async fn is_wifi(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                network_type: Some(NetworkType::WiFi),
                ..
            })
        )
    }

    /// Check if connection is metered
    async fn is_metered(&self) -> bool {
        matches!(
            self.get_network_info().await,
            Ok(NetworkInfo {
                is_metered: true,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMonitor(NetworkInfo);

    #[async_trait::async_trait]
    impl NetworkMonitor for FixedMonitor {
        async fn get_network_info(&self) -> Result<NetworkInfo> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_network_info() {
        let info = NetworkInfo::connected(NetworkType::WiFi).with_quality(NetworkQuality::Good);

        assert_eq!(info.status, NetworkStatus::Connected);
        assert_eq!(info.network_type, Some(NetworkType::WiFi));
        assert_eq!(info.quality, NetworkQuality::Good);
        assert!(!info.is_metered);
        assert!(!info.is_costly());
    }

    #[test]
    fn test_cellular_defaults_to_metered() {
        let info = NetworkInfo::connected(NetworkType::Cellular);
        assert!(info.is_metered);
        assert!(info.is_costly());
        assert!(!NetworkInfo::disconnected().is_connected());
    }

    #[tokio::test]
    async fn test_default_monitor_helpers() {
        let monitor = FixedMonitor(NetworkInfo::connected(NetworkType::WiFi));
        assert!(monitor.is_connected().await);
        assert!(monitor.is_wifi().await);
        assert!(!monitor.is_metered().await);

        let offline = FixedMonitor(NetworkInfo::disconnected());
        assert!(!offline.is_connected().await);
        assert!(!offline.is_wifi().await);
    }
}
