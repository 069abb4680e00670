//! SIA Agent - periodic hardware telemetry writer
//!
//! Reads `config.json`, then loops forever: collect a sample, append it to
//! the machine's monthly document and to the monthly aggregate on the shared
//! path, sleep. Write failures are logged; the process keeps running.

use std::sync::Arc;

use anyhow::{Context, Result};
use sia_agent::config::{application_dir, AgentConfig};
use sia_agent::metrics::{select_provider, DEFAULT_NETWORK_WINDOW};
use sia_agent::{logging, Agent};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let app_dir = application_dir().ok();
    logging::init(app_dir.as_deref());

    info!("SIA Agent starting...");

    let config_path = AgentConfig::config_file_path()
        .context("Failed to locate configuration file")?;
    let (config, source) = AgentConfig::load(&config_path).await;
    info!(config = %config_path.display(), ?source, "Configuration ready");

    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    if hostname.is_empty() && config.machine_alias.is_empty() {
        warn!("No hostname and no MACHINE_ALIAS; documents will use a fallback name");
    }

    let provider = select_provider(DEFAULT_NETWORK_WINDOW);
    let agent = Agent::new(Arc::new(config), hostname, provider);

    agent.run().await
        .context("Agent execution failed")?;

    Ok(())
}
