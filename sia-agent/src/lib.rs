//! SIA Agent - hardware telemetry for a shared network folder
//!
//! Each agent instance samples its host periodically and appends the sample to:
//! - its own monthly history (`<YYYY-MM>/<alias or hostname>.json`)
//! - the monthly aggregate shared by every machine (`<YYYY-MM>/dados_gerais_mensal.json`)
//!
//! Cross-platform support (Linux, Windows, macOS) through `sysinfo`.

pub mod agent;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod record;

pub use agent::{Agent, CycleStatus};
pub use config::AgentConfig;
pub use record::Record;
