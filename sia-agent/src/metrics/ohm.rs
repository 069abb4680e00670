//! OpenHardwareMonitor readings
//!
//! On Windows the monitor publishes its hardware tree in the WMI namespace
//! `root\OpenHardwareMonitor`. Each hardware node (CPU, GPU, HDD, mainboard)
//! carries sensors grouped by type: `temperature`, `load`, `power`, `clock`,
//! `smalldata`, `level`, `data`. The mapping onto `Monitoring` lives here and
//! is platform independent; only the query is Windows specific.

use std::collections::{BTreeMap, HashMap};

use super::host::sensor_key;
use crate::record::{round2, DiskReading, GpuMemoryReading, Monitoring};

const TB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

/// One hardware node and its sensors
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareNode {
    /// `CPU`, `GpuNvidia`, `GpuAti`, `HDD`, `Mainboard`, ...
    pub hardware_type: String,
    pub name: String,
    pub sensors: Vec<SensorSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub sensor_type: String,
    pub name: String,
    pub value: f64,
}

/// Sensor readings of one node: type -> sensor key -> rounded value
type SensorTable = HashMap<String, BTreeMap<String, f64>>;

fn sensor_table(node: &HardwareNode) -> SensorTable {
    let mut table = SensorTable::new();
    for sensor in &node.sensors {
        table
            .entry(sensor.sensor_type.to_lowercase())
            .or_default()
            .insert(sensor_key(&sensor.name), round2(sensor.value));
    }
    table
}

fn reading(table: &SensorTable, sensor_type: &str, key: &str) -> Option<f64> {
    table.get(sensor_type)?.get(key).copied()
}

/// Overlay monitor readings on top of the sampled ones.
///
/// Only the first CPU, GPU and mainboard nodes are used. Every HDD node is
/// reported; the first one matching `main_mount` or named as an SSD, with at
/// least one reading, is folded into `disco_principal`.
pub fn apply_hardware(monitoring: &mut Monitoring, nodes: &[HardwareNode], main_mount: &str) {
    let (mut cpu_done, mut gpu_done, mut board_done, mut main_disk_done) = (false, false, false, false);

    for node in nodes {
        let kind = node.hardware_type.to_lowercase();
        let table = sensor_table(node);

        if kind == "cpu" && !cpu_done {
            let cpu = &mut monitoring.cpu;
            cpu.name = Some(node.name.clone());
            if let Some(temps) = table.get("temperature") {
                if let Some(package) = temps.get("cpu_package") {
                    cpu.package_celsius = Some(*package);
                }
                let cores: BTreeMap<_, _> = temps
                    .iter()
                    .filter(|(key, _)| key.contains("cpu_core"))
                    .map(|(key, value)| (key.clone(), *value))
                    .collect();
                if !cores.is_empty() {
                    cpu.core_celsius = Some(cores);
                }
            }
            if table.contains_key("load") {
                cpu.total_load_percent = reading(&table, "load", "cpu_total");
            }
            cpu.power_watts = table.get("power").cloned();
            cpu.clocks_mhz = table.get("clock").cloned();
            cpu_done = true;
        } else if kind.contains("gpu") && !gpu_done {
            let gpu = &mut monitoring.gpu;
            gpu.name = Some(node.name.clone());
            gpu.kind = Some(node.hardware_type.clone());
            if let Some(celsius) = reading(&table, "temperature", "gpu_core") {
                gpu.core_celsius = Some(celsius);
            }
            if let Some(load) = reading(&table, "load", "gpu_core") {
                gpu.usage_percent = Some(load);
            }
            if table.contains_key("smalldata") {
                gpu.memory = Some(GpuMemoryReading {
                    used_mb: reading(&table, "smalldata", "gpu_memory_used"),
                    free_mb: reading(&table, "smalldata", "gpu_memory_free"),
                    total_mb: reading(&table, "smalldata", "gpu_memory_total"),
                });
            }
            gpu.clocks_mhz = table.get("clock").cloned();
            gpu_done = true;
        } else if kind == "hdd" {
            let entry = DiskReading {
                name: Some(node.name.clone()),
                kind: Some(node.hardware_type.clone()),
                celsius: reading(&table, "temperature", "temperature"),
                space_usage_percent: reading(&table, "load", "used_space"),
                remaining_life_percent: reading(&table, "level", "remaining_life"),
                written_tb: reading(&table, "data", "total_bytes_written").map(|bytes| round2(bytes / TB)),
                ..DiskReading::default()
            };

            let has_readings =
                entry.celsius.is_some() || entry.space_usage_percent.is_some() || entry.remaining_life_percent.is_some();
            let is_main_candidate =
                node.name.contains(main_mount) || node.name.to_lowercase().contains("ssd");

            if !main_disk_done && has_readings && is_main_candidate {
                let main = &mut monitoring.main_disk;
                main.name = entry.name;
                main.celsius = entry.celsius.or(main.celsius);
                main.space_usage_percent = entry.space_usage_percent;
                main.remaining_life_percent = entry.remaining_life_percent;
                main.written_tb = entry.written_tb;
                main_disk_done = true;
            } else {
                monitoring.other_disks.push(entry);
            }
        } else if kind == "mainboard" && !board_done {
            monitoring.mainboard.name = Some(node.name.clone());
            if let Some(temps) = table.get("temperature") {
                monitoring.mainboard.celsius = Some(temps.clone());
            }
            board_done = true;
        }
    }
}

#[cfg(windows)]
mod wmi_source {
    use std::collections::HashMap;

    use serde::Deserialize;
    use wmi::{COMLibrary, WMIConnection, WMIError};

    use super::{HardwareNode, SensorSample};

    const NAMESPACE: &str = r"root\OpenHardwareMonitor";

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Hardware {
        identifier: String,
        name: String,
        hardware_type: String,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Sensor {
        parent: String,
        name: String,
        sensor_type: String,
        value: f32,
    }

    /// Query the whole hardware tree; blocking, COM is initialised per call
    pub fn read_hardware() -> Result<Vec<HardwareNode>, WMIError> {
        let com = COMLibrary::new()?;
        let connection = WMIConnection::with_namespace_path(NAMESPACE, com)?;

        let hardware: Vec<Hardware> = connection.raw_query("SELECT Identifier, Name, HardwareType FROM Hardware")?;
        let sensors: Vec<Sensor> = connection.raw_query("SELECT Parent, Name, SensorType, Value FROM Sensor")?;

        let mut by_parent: HashMap<String, Vec<SensorSample>> = HashMap::new();
        for sensor in sensors {
            by_parent.entry(sensor.parent).or_default().push(SensorSample {
                sensor_type: sensor.sensor_type,
                name: sensor.name,
                value: f64::from(sensor.value),
            });
        }

        Ok(hardware
            .into_iter()
            .map(|hw| HardwareNode {
                sensors: by_parent.remove(&hw.identifier).unwrap_or_default(),
                hardware_type: hw.hardware_type,
                name: hw.name,
            })
            .collect())
    }
}

#[cfg(windows)]
pub use wmi_source::read_hardware;
