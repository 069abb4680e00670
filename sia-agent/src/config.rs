//! Agent configuration
//!
//! Handles:
//! - `config.json` beside the executable (or `SIA_AGENT_CONFIG`)
//! - Writing a default file on first start
//! - Per-key fallback to built-in defaults, including keys of the wrong type
//! - Retry tuning for the shared-document writes

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sia_store::RetryPolicy;
use tracing::{error, info, warn};

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const CONFIG_ENV_VAR: &str = "SIA_AGENT_CONFIG";
pub const DEFAULT_SHARED_PATH: &str = r"\\10.10.10.61\ti\SIA";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentConfig {
    #[serde(rename = "SHARED_NETWORK_PATH")]
    pub shared_network_path: PathBuf,
    #[serde(rename = "COLLECTION_INTERVAL_SECONDS")]
    pub collection_interval_secs: u64,
    /// Empty means "use the hostname"
    #[serde(rename = "MACHINE_ALIAS")]
    pub machine_alias: String,
    #[serde(rename = "MAX_RETRIES")]
    pub max_retries: u32,
    #[serde(rename = "INITIAL_BACKOFF_SECONDS")]
    pub initial_backoff_secs: f64,
    #[serde(rename = "MAX_BACKOFF_SECONDS")]
    pub max_backoff_secs: f64,
    #[serde(rename = "LOCK_POLL_INTERVAL_SECONDS")]
    pub lock_poll_interval_secs: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            shared_network_path: PathBuf::from(DEFAULT_SHARED_PATH),
            collection_interval_secs: 10,
            machine_alias: String::new(),
            max_retries: 5,
            initial_backoff_secs: 1.0,
            max_backoff_secs: 60.0,
            lock_poll_interval_secs: 0.1,
        }
    }
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// File was absent; a default one was written (or attempted)
    CreatedDefault,
    /// File was present but unusable
    FallbackDefault,
}

impl AgentConfig {
    /// Load from `path`; never fails, falls back to defaults instead
    pub async fn load(path: &Path) -> (Self, ConfigSource) {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(config = %path.display(), "Configuration file not found, creating a default one");
            let config = Self::default();
            match config.save(path).await {
                Ok(()) => info!(config = %path.display(), "Default configuration file created"),
                Err(e) => error!(config = %path.display(), error = %e, "Could not create default configuration file"),
            }
            return (config, ConfigSource::CreatedDefault);
        }

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                error!(config = %path.display(), error = %e, "Could not read configuration, using defaults");
                return (Self::default(), ConfigSource::FallbackDefault);
            }
        };

        match serde_json::from_str::<Map<String, Value>>(&content) {
            Ok(document) => {
                let config = Self::from_document(&document);
                info!(
                    config = %path.display(),
                    shared_path = %config.shared_network_path.display(),
                    interval_secs = config.collection_interval_secs,
                    alias = %config.machine_alias,
                    "Configuration loaded"
                );
                (config, ConfigSource::File)
            }
            Err(e) => {
                error!(config = %path.display(), error = %e, "Invalid configuration JSON, using defaults");
                (Self::default(), ConfigSource::FallbackDefault)
            }
        }
    }

    /// Each key is read on its own; absent or unusable ones keep their default
    fn from_document(document: &Map<String, Value>) -> Self {
        let defaults = Self::default();
        Self {
            shared_network_path: key_or(document, "SHARED_NETWORK_PATH", defaults.shared_network_path),
            collection_interval_secs: key_or(
                document,
                "COLLECTION_INTERVAL_SECONDS",
                defaults.collection_interval_secs,
            ),
            machine_alias: key_or(document, "MACHINE_ALIAS", defaults.machine_alias),
            max_retries: key_or(document, "MAX_RETRIES", defaults.max_retries),
            initial_backoff_secs: key_or(document, "INITIAL_BACKOFF_SECONDS", defaults.initial_backoff_secs),
            max_backoff_secs: key_or(document, "MAX_BACKOFF_SECONDS", defaults.max_backoff_secs),
            lock_poll_interval_secs: key_or(
                document,
                "LOCK_POLL_INTERVAL_SECONDS",
                defaults.lock_poll_interval_secs,
            ),
        }
    }

    /// Write as 4-space indented JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut content = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut content, formatter);
        self.serialize(&mut ser)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// `SIA_AGENT_CONFIG`, else `config.json` next to the executable
    pub fn config_file_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }
        Ok(application_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Pause between two cycles, at least one second
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            initial_backoff: seconds_or(self.initial_backoff_secs, defaults.initial_backoff),
            max_backoff: seconds_or(self.max_backoff_secs, defaults.max_backoff),
            lock_poll_interval: seconds_or(self.lock_poll_interval_secs, defaults.lock_poll_interval),
        }
    }
}

/// Directory holding the running executable
pub fn application_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Could not locate the agent executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("Executable path has no parent directory"))
}

fn key_or<T: DeserializeOwned>(document: &Map<String, Value>, key: &str, default: T) -> T {
    let Some(value) = document.get(key) else {
        return default;
    };
    match <T as Deserialize>::deserialize(value) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(key, value = %value, error = %e, "Invalid configuration value, using default for this key");
            default
        }
    }
}

fn seconds_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(fallback)
}
