use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::AppendReceipt;

/// Failure of a single attempt against one document
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer held the `.lock` marker for the whole wait window
    #[error("lock unavailable for {} after {waited:?}{}", path.display(), holder_suffix(holder))]
    LockUnavailable {
        path: PathBuf,
        waited: Duration,
        holder: Option<String>,
    },
    /// Document exists but is not a JSON array (or not JSON at all)
    #[error("malformed document {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Malformed content persists until someone fixes the file by hand
    pub fn is_malformed(&self) -> bool {
        matches!(self, StoreError::Malformed { .. })
    }
}

fn holder_suffix(holder: &Option<String>) -> String {
    match holder {
        Some(h) => format!(" (held by {h})"),
        None => String::new(),
    }
}

/// Outcome of `RetryCoordinator::append_with_retry` when the record was not persisted
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error("record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("append to {} abandoned after {attempts} attempts: {last}", path.display())]
    Exhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        last: StoreError,
    },
}

/// Failure of one telemetry cycle (individual + aggregate documents)
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("could not create monthly folder {}: {source}", path.display())]
    MonthDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("individual document not updated, aggregate skipped: {0}")]
    Individual(#[source] AppendError),
    #[error("aggregate document not updated: {source}")]
    Aggregate {
        individual: AppendReceipt,
        #[source]
        source: AppendError,
    },
}
