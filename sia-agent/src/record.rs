//! Telemetry record written to the shared documents
//!
//! Field names on the wire are the Portuguese keys the central consumers
//! already read (`timestamp_coleta`, `monitoramento`, ...).

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Format of `timestamp_coleta`
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// One telemetry sample for one machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub hostname: String,
    pub machine_alias: String,
    #[serde(rename = "timestamp_coleta")]
    pub collected_at: String,
    #[serde(rename = "monitoramento")]
    pub monitoring: Monitoring,
}

impl Record {
    /// Stamp a sample; an empty alias falls back to the hostname
    pub fn new(hostname: &str, alias: &str, collected_at: NaiveDateTime, monitoring: Monitoring) -> Self {
        let machine_alias = if alias.trim().is_empty() { hostname } else { alias.trim() };
        Self {
            hostname: hostname.to_string(),
            machine_alias: machine_alias.to_string(),
            collected_at: collected_at.format(TIMESTAMP_FORMAT).to_string(),
            monitoring,
        }
    }

    /// Name of the machine's own document
    pub fn identifier(&self) -> &str {
        &self.machine_alias
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Monitoring {
    pub cpu: CpuReading,
    #[serde(rename = "memoria_ram")]
    pub memory: MemoryReading,
    #[serde(rename = "disco_principal")]
    pub main_disk: DiskReading,
    #[serde(rename = "discos_adicionais")]
    pub other_disks: Vec<DiskReading>,
    pub gpu: GpuReading,
    #[serde(rename = "rede")]
    pub network: NetworkReading,
    #[serde(rename = "placa_mae")]
    pub mainboard: MainboardReading,
    #[serde(rename = "uptime_horas")]
    pub uptime_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuReading {
    #[serde(rename = "nome", skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(rename = "percentual_uso")]
    pub usage_percent: f64,
    #[serde(rename = "nucleos_fisicos")]
    pub physical_cores: Option<usize>,
    #[serde(rename = "nucleos_logicos")]
    pub logical_cores: usize,
    #[serde(rename = "temperatura_package_celsius", skip_serializing_if = "Option::is_none", default)]
    pub package_celsius: Option<f64>,
    #[serde(rename = "temperaturas_cores_celsius", skip_serializing_if = "Option::is_none", default)]
    pub core_celsius: Option<BTreeMap<String, f64>>,
    /// Load reported by the hardware monitor, next to the sampled `percentual_uso`
    #[serde(rename = "uso_total_percent", skip_serializing_if = "Option::is_none", default)]
    pub total_load_percent: Option<f64>,
    #[serde(rename = "energia_watts", skip_serializing_if = "Option::is_none", default)]
    pub power_watts: Option<BTreeMap<String, f64>>,
    #[serde(rename = "clocks_mhz", skip_serializing_if = "Option::is_none", default)]
    pub clocks_mhz: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub total_gb: f64,
    #[serde(rename = "usado_gb")]
    pub used_gb: f64,
    #[serde(rename = "percentual_uso")]
    pub usage_percent: f64,
}

/// Main disk or one of `discos_adicionais`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskReading {
    #[serde(rename = "nome", skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(rename = "tipo", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,
    #[serde(rename = "ponto_montagem", skip_serializing_if = "Option::is_none", default)]
    pub mount_point: Option<String>,
    pub total_gb: f64,
    #[serde(rename = "usado_gb")]
    pub used_gb: f64,
    #[serde(rename = "livre_gb")]
    pub free_gb: f64,
    #[serde(rename = "percentual_uso")]
    pub usage_percent: f64,
    #[serde(rename = "temperatura_celsius", skip_serializing_if = "Option::is_none", default)]
    pub celsius: Option<f64>,
    #[serde(rename = "uso_espaco_percent", skip_serializing_if = "Option::is_none", default)]
    pub space_usage_percent: Option<f64>,
    #[serde(rename = "vida_util_restante_percent", skip_serializing_if = "Option::is_none", default)]
    pub remaining_life_percent: Option<f64>,
    #[serde(rename = "dados_gravados_tb", skip_serializing_if = "Option::is_none", default)]
    pub written_tb: Option<f64>,
}

/// Empty object when the host exposes no GPU sensor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    #[serde(rename = "nome", skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(rename = "tipo", skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,
    #[serde(rename = "temperatura_core_celsius", skip_serializing_if = "Option::is_none", default)]
    pub core_celsius: Option<f64>,
    #[serde(rename = "uso_percentual", skip_serializing_if = "Option::is_none", default)]
    pub usage_percent: Option<f64>,
    #[serde(rename = "memoria_gpu", skip_serializing_if = "Option::is_none", default)]
    pub memory: Option<GpuMemoryReading>,
    #[serde(rename = "clocks_mhz", skip_serializing_if = "Option::is_none", default)]
    pub clocks_mhz: Option<BTreeMap<String, f64>>,
}

/// Keys are always written; a sensor the monitor does not expose is `null`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuMemoryReading {
    #[serde(rename = "usada_mb")]
    pub used_mb: Option<f64>,
    #[serde(rename = "livre_mb")]
    pub free_mb: Option<f64>,
    #[serde(rename = "total_mb")]
    pub total_mb: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkReading {
    #[serde(rename = "bytes_enviados_mb")]
    pub sent_mb: f64,
    #[serde(rename = "bytes_recebidos_mb")]
    pub received_mb: f64,
    #[serde(rename = "velocidade_atual_mbps")]
    pub current_mbps: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MainboardReading {
    #[serde(rename = "nome", skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(rename = "temperaturas_celsius", skip_serializing_if = "Option::is_none", default)]
    pub celsius: Option<BTreeMap<String, f64>>,
}

/// Derived figures (percentages, GB, Mbps) are stored with 2 decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
