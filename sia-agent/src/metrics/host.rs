use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sysinfo::{Components, Disk, Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

#[cfg(windows)]
use super::ohm;
use super::{CollectionError, MetricsProvider};
use crate::record::{
    round2, CpuReading, DiskReading, GpuReading, MainboardReading, MemoryReading, Monitoring, NetworkReading,
};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MB: f64 = 1024.0 * 1024.0;

#[cfg(windows)]
pub(super) const MAIN_MOUNT: &str = "C:\\";
#[cfg(not(windows))]
pub(super) const MAIN_MOUNT: &str = "/";

/// Where temperatures and other hardware readings come from
enum SensorSource {
    None,
    Components(Components),
    /// OpenHardwareMonitor, queried through WMI on every cycle
    #[cfg(windows)]
    HardwareMonitor,
}

/// Cross-platform provider backed by `sysinfo`
pub struct SysinfoProvider {
    system: System,
    networks: Networks,
    disks: Disks,
    sensors: SensorSource,
    network_window: Duration,
}

impl SysinfoProvider {
    /// Richest variant the host supports: OpenHardwareMonitor, then
    /// temperature components, then basic.
    pub fn detect(network_window: Duration) -> Self {
        let mut provider = Self::basic(network_window);

        #[cfg(windows)]
        match ohm::read_hardware() {
            Ok(nodes) => {
                debug!(hardware = nodes.len(), "OpenHardwareMonitor namespace answered");
                provider.sensors = SensorSource::HardwareMonitor;
                return provider;
            }
            Err(e) => debug!(error = %e, "OpenHardwareMonitor unavailable, probing sensors"),
        }

        let components = Components::new_with_refreshed_list();
        let has_sensors = components.iter().any(|c| c.temperature().is_finite());
        debug!(components = components.iter().count(), has_sensors, "Probed temperature sensors");

        if has_sensors {
            provider.sensors = SensorSource::Components(components);
        }
        provider
    }

    /// CPU, memory, disks, network and uptime only
    pub fn basic(network_window: Duration) -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            sensors: SensorSource::None,
            network_window,
        }
    }

    fn cpu(&self) -> Result<CpuReading, CollectionError> {
        let cpus = self.system.cpus();
        let first = cpus.first().ok_or(CollectionError::NoCpu)?;
        let brand = first.brand().trim();

        Ok(CpuReading {
            name: (!brand.is_empty()).then(|| brand.to_string()),
            usage_percent: round2(self.system.global_cpu_info().cpu_usage() as f64),
            physical_cores: self.system.physical_core_count(),
            logical_cores: cpus.len(),
            ..CpuReading::default()
        })
    }

    fn memory(&self) -> Result<MemoryReading, CollectionError> {
        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectionError::NoMemory);
        }
        let used = total.saturating_sub(self.system.available_memory());

        Ok(MemoryReading {
            total_gb: round2(total as f64 / GB),
            used_gb: round2(used as f64 / GB),
            usage_percent: round2(used as f64 / total as f64 * 100.0),
        })
    }

    /// Main disk first, every other mounted disk after it
    fn disks(&mut self) -> (DiskReading, Vec<DiskReading>) {
        self.disks.refresh_list();

        let mut readings: Vec<(bool, DiskReading)> = self
            .disks
            .iter()
            .map(|disk| (disk.mount_point().as_os_str() == MAIN_MOUNT, disk_reading(disk)))
            .collect();

        if readings.is_empty() {
            return (DiskReading::default(), Vec::new());
        }
        let main_index = readings.iter().position(|(is_main, _)| *is_main).unwrap_or(0);
        let (_, main) = readings.remove(main_index);
        (main, readings.into_iter().map(|(_, r)| r).collect())
    }

    fn network(&self, elapsed: Duration) -> NetworkReading {
        let (mut sent, mut received, mut window_bytes) = (0u64, 0u64, 0u64);
        for (_name, data) in self.networks.iter() {
            sent += data.total_transmitted();
            received += data.total_received();
            window_bytes += data.transmitted() + data.received();
        }

        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        NetworkReading {
            sent_mb: round2(sent as f64 / MB),
            received_mb: round2(received as f64 / MB),
            current_mbps: round2(window_bytes as f64 * 8.0 / 1_000_000.0 / secs),
        }
    }

    async fn apply_sensors(&mut self, monitoring: &mut Monitoring) {
        match &mut self.sensors {
            SensorSource::None => {}
            SensorSource::Components(components) => {
                components.refresh();
                apply_components(components, monitoring);
            }
            #[cfg(windows)]
            SensorSource::HardwareMonitor => {
                // Base readings are kept when the monitor stops answering
                match tokio::task::spawn_blocking(ohm::read_hardware).await {
                    Ok(Ok(nodes)) => ohm::apply_hardware(monitoring, &nodes, MAIN_MOUNT),
                    Ok(Err(e)) => tracing::error!(
                        error = %e,
                        "OpenHardwareMonitor query failed; is it running and its WMI namespace reachable?"
                    ),
                    Err(e) => tracing::error!(error = %e, "OpenHardwareMonitor query aborted"),
                }
            }
        }
    }
}

fn apply_components(components: &Components, monitoring: &mut Monitoring) {
    let mut cores = BTreeMap::new();
    let mut board = BTreeMap::new();
    for component in components.iter() {
        let celsius = component.temperature() as f64;
        if !celsius.is_finite() {
            continue;
        }
        let celsius = round2(celsius);
        let label = component.label();
        let key = sensor_key(label);

        match SensorKind::classify(&key) {
            SensorKind::CpuPackage => {
                monitoring.cpu.package_celsius.get_or_insert(celsius);
            }
            SensorKind::CpuCore => {
                cores.insert(key, celsius);
            }
            SensorKind::Gpu => {
                if monitoring.gpu.core_celsius.is_none() {
                    monitoring.gpu = GpuReading {
                        name: Some(label.to_string()),
                        core_celsius: Some(celsius),
                        ..GpuReading::default()
                    };
                }
            }
            SensorKind::Disk => {
                monitoring.main_disk.celsius.get_or_insert(celsius);
            }
            SensorKind::Board => {
                board.insert(key, celsius);
            }
        }
    }

    if !cores.is_empty() {
        monitoring.cpu.core_celsius = Some(cores);
    }
    if !board.is_empty() {
        monitoring.mainboard = MainboardReading {
            name: None,
            celsius: Some(board),
        };
    }
}

#[async_trait]
impl MetricsProvider for SysinfoProvider {
    fn name(&self) -> &'static str {
        match self.sensors {
            SensorSource::None => "sysinfo",
            SensorSource::Components(_) => "sysinfo+sensors",
            #[cfg(windows)]
            SensorSource::HardwareMonitor => "sysinfo+ohm",
        }
    }

    async fn collect(&mut self) -> Result<Monitoring, CollectionError> {
        debug!("Collecting system metrics...");

        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.networks.refresh();
        let window_start = Instant::now();

        // CPU usage and network rate both need two samples
        tokio::time::sleep(self.network_window.max(MINIMUM_CPU_UPDATE_INTERVAL)).await;
        self.system.refresh_cpu();
        self.networks.refresh();
        let elapsed = window_start.elapsed();

        let (main_disk, other_disks) = self.disks();
        let mut monitoring = Monitoring {
            cpu: self.cpu()?,
            memory: self.memory()?,
            main_disk,
            other_disks,
            network: self.network(elapsed),
            uptime_hours: Some(round2(System::uptime() as f64 / 3600.0)),
            ..Monitoring::default()
        };
        self.apply_sensors(&mut monitoring).await;

        Ok(monitoring)
    }
}

fn disk_reading(disk: &Disk) -> DiskReading {
    let total = disk.total_space();
    let free = disk.available_space();
    let used = total.saturating_sub(free);
    let name = disk.name().to_string_lossy();

    DiskReading {
        name: (!name.is_empty()).then(|| name.to_string()),
        kind: Some(format!("{:?}", disk.kind())),
        mount_point: Some(disk.mount_point().display().to_string()),
        total_gb: round2(total as f64 / GB),
        used_gb: round2(used as f64 / GB),
        free_gb: round2(free as f64 / GB),
        usage_percent: if total > 0 {
            round2(used as f64 / total as f64 * 100.0)
        } else {
            0.0
        },
        ..DiskReading::default()
    }
}

/// `"Core #1 (Tdie)"` -> `"core_1_tdie"`
pub(super) fn sensor_key(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .replace(['(', ')', '#'], "")
        .replace([' ', '-'], "_")
}

#[derive(Debug, PartialEq, Eq)]
enum SensorKind {
    CpuPackage,
    CpuCore,
    Gpu,
    Disk,
    Board,
}

impl SensorKind {
    fn classify(key: &str) -> Self {
        const GPU: &[&str] = &["gpu", "nouveau", "radeon", "nvidia"];
        const DISK: &[&str] = &["nvme", "drive", "sata", "ssd", "hdd"];
        const CPU: &[&str] = &["tdie", "cpu", "k10temp"];

        if GPU.iter().any(|p| key.contains(p)) {
            SensorKind::Gpu
        } else if key.contains("package") || key.contains("tctl") {
            SensorKind::CpuPackage
        } else if key.contains("core") {
            SensorKind::CpuCore
        } else if CPU.iter().any(|p| key.contains(p)) {
            SensorKind::CpuPackage
        } else if DISK.iter().any(|p| key.contains(p)) {
            SensorKind::Disk
        } else {
            SensorKind::Board
        }
    }
}
