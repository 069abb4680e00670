//! Logging setup
//!
//! - stderr: `warn` and above by default, `RUST_LOG` overrides
//! - `monitor_agent_script.log` beside the executable: errors only, appended

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const LOG_FILE_NAME: &str = "monitor_agent_script.log";

/// Install the global subscriber; the file sink is skipped if it cannot be opened
pub fn init(log_dir: Option<&Path>) {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")));

    let log_path = log_dir.map(|dir| dir.join(LOG_FILE_NAME));
    let opened = log_path.as_ref().map(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
    });

    let (file_layer, file_error) = match opened {
        Some(Ok(file)) => {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .with_filter(LevelFilter::ERROR);
            (Some(layer), None)
        }
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();

    if let (Some(path), Some(e)) = (log_path, file_error) {
        warn!(log_file = %path.display(), error = %e, "Could not open log file, logging to stderr only");
    }
}
