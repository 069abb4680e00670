//! Telemetry loop: collect, persist to the shared root, sleep, repeat.
//!
//! Failures never leave the loop. A failed collection skips the cycle; a
//! failed write is logged and the next cycle starts on schedule.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use sia_store::MonthlyArchive;
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::metrics::MetricsProvider;
use crate::record::Record;

/// Result of one collect + persist cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Both documents received the record
    Persisted,
    /// Collection failed; nothing was written
    Skipped,
    /// At least one document was not updated
    Failed,
}

/// Main agent state
pub struct Agent {
    config: Arc<AgentConfig>,
    hostname: String,
    archive: Arc<MonthlyArchive>,
    provider: Box<dyn MetricsProvider>,
}

impl Agent {
    pub fn new(config: Arc<AgentConfig>, hostname: String, provider: Box<dyn MetricsProvider>) -> Self {
        let archive = Arc::new(MonthlyArchive::new(
            config.shared_network_path.clone(),
            config.retry_policy(),
        ));

        info!(
            hostname = %hostname,
            provider = provider.name(),
            shared_path = %config.shared_network_path.display(),
            "Agent initialized"
        );

        Self {
            config,
            hostname,
            archive,
            provider,
        }
    }

    pub fn archive(&self) -> &MonthlyArchive {
        &self.archive
    }

    /// Run cycles until Ctrl-C
    pub async fn run(mut self) -> Result<()> {
        let interval = self.config.collection_interval();
        info!(interval_secs = interval.as_secs(), "Starting agent main loop...");

        loop {
            self.run_cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested, stopping agent");
                    return Ok(());
                }
            }
        }
    }

    /// One collect + persist pass
    pub async fn run_cycle(&mut self) -> CycleStatus {
        let collected_at = Local::now().naive_local();
        let Some(record) = self.collect_record(collected_at).await else {
            return CycleStatus::Skipped;
        };

        let archive = Arc::clone(&self.archive);
        let persisted = tokio::task::spawn_blocking(move || {
            archive.persist(record.identifier(), &record, collected_at)
        })
        .await;

        match persisted {
            Ok(Ok(report)) => {
                info!(
                    individual = %report.individual.path.display(),
                    aggregate = %report.aggregate.path.display(),
                    "Telemetry cycle persisted"
                );
                CycleStatus::Persisted
            }
            Ok(Err(e)) => {
                error!(error = %e, "Telemetry cycle not persisted");
                CycleStatus::Failed
            }
            Err(e) => {
                error!(error = %e, "Persistence task aborted");
                CycleStatus::Failed
            }
        }
    }

    /// Sample the host; `None` means this cycle is skipped
    pub async fn collect_record(&mut self, collected_at: NaiveDateTime) -> Option<Record> {
        match self.provider.collect().await {
            Ok(monitoring) => Some(Record::new(
                &self.hostname,
                &self.config.machine_alias,
                collected_at,
                monitoring,
            )),
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "Collection failed, skipping cycle");
                None
            }
        }
    }
}
