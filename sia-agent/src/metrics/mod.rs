//! System metrics collection for SIA agents
//!
//! A `MetricsProvider` turns the host's platform APIs into a `Monitoring`
//! block. The variant is chosen once at startup by `select_provider`:
//! - host metrics only (CPU, RAM, disks, network, uptime)
//! - host metrics plus temperature sensors, when the host exposes any
//! - host metrics plus OpenHardwareMonitor readings (Windows, when its WMI
//!   namespace answers): loads, clocks, power, GPU memory, disk health

mod host;
#[cfg_attr(not(windows), allow(dead_code))]
mod ohm;

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::record::Monitoring;

pub use host::SysinfoProvider;

/// Window used to measure the instantaneous network rate
pub const DEFAULT_NETWORK_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("no CPU information available")]
    NoCpu,
    #[error("no memory information available")]
    NoMemory,
}

/// Source of one `Monitoring` sample per cycle
#[async_trait]
pub trait MetricsProvider: Send {
    fn name(&self) -> &'static str;

    async fn collect(&mut self) -> Result<Monitoring, CollectionError>;
}

/// Pick the provider variant for this host
pub fn select_provider(network_window: Duration) -> Box<dyn MetricsProvider> {
    let provider = SysinfoProvider::detect(network_window);
    info!(provider = provider.name(), "Metrics provider selected");
    Box::new(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_collection() {
        let mut provider = select_provider(Duration::from_millis(100));
        let monitoring = provider.collect().await.unwrap();

        assert!(monitoring.cpu.logical_cores > 0);
        assert!(monitoring.memory.total_gb > 0.0);
        assert!(monitoring.cpu.usage_percent >= 0.0);
        assert!(monitoring.network.current_mbps >= 0.0);
        assert!(monitoring.uptime_hours.unwrap_or(0.0) >= 0.0);
    }

    #[tokio::test]
    async fn test_basic_provider_has_no_sensor_fields() {
        let mut provider = SysinfoProvider::basic(Duration::from_millis(50));
        assert_eq!(provider.name(), "sysinfo");

        let monitoring = provider.collect().await.unwrap();
        assert!(monitoring.cpu.package_celsius.is_none());
        assert!(monitoring.gpu.core_celsius.is_none());
        assert!(monitoring.mainboard.celsius.is_none());
    }
}
