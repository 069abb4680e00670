//! Monthly folder layout on the shared root
//!
//! ```text
//! <root>/<YYYY-MM>/<machine>.json              one machine's history
//! <root>/<YYYY-MM>/dados_gerais_mensal.json    every machine, that month
//! ```
//!
//! Each telemetry cycle appends one record to both documents, individual
//! first. The aggregate is only touched if the individual append succeeded.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CycleError;
use crate::retry::{AppendReceipt, RetryCoordinator, RetryPolicy, Sleeper, ThreadSleeper};

/// File stem of the document shared by all machines of a month
pub const AGGREGATE_DOCUMENT: &str = "dados_gerais_mensal";

/// Used when neither alias nor hostname yields a usable file name
const FALLBACK_IDENTIFIER: &str = "unknown-host";

/// Both appends of a successful cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub individual: AppendReceipt,
    pub aggregate: AppendReceipt,
}

/// Shared root holding one folder per month
#[derive(Debug, Clone)]
pub struct MonthlyArchive<S = ThreadSleeper> {
    root: PathBuf,
    coordinator: RetryCoordinator<S>,
}

impl MonthlyArchive<ThreadSleeper> {
    pub fn new<P: Into<PathBuf>>(root: P, policy: RetryPolicy) -> Self {
        Self::with_coordinator(root, RetryCoordinator::new(policy))
    }
}

impl<S: Sleeper> MonthlyArchive<S> {
    pub fn with_coordinator<P: Into<PathBuf>>(root: P, coordinator: RetryCoordinator<S>) -> Self {
        Self {
            root: root.into(),
            coordinator,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn coordinator(&self) -> &RetryCoordinator<S> {
        &self.coordinator
    }

    /// `<root>/<YYYY-MM>` for the month containing `at`
    pub fn month_dir(&self, at: NaiveDateTime) -> PathBuf {
        self.root.join(format!("{:04}-{:02}", at.year(), at.month()))
    }

    pub fn individual_path(&self, at: NaiveDateTime, identifier: &str) -> PathBuf {
        self.month_dir(at)
            .join(format!("{}.json", sanitize_identifier(identifier)))
    }

    pub fn aggregate_path(&self, at: NaiveDateTime) -> PathBuf {
        self.month_dir(at).join(format!("{AGGREGATE_DOCUMENT}.json"))
    }

    /// Create the month folder if needed; safe to call on every cycle
    pub fn ensure_month_dir(&self, at: NaiveDateTime) -> Result<PathBuf, CycleError> {
        let dir = self.month_dir(at);
        if dir.is_dir() {
            return Ok(dir);
        }

        fs::create_dir_all(&dir).map_err(|source| CycleError::MonthDirectory {
            path: dir.clone(),
            source,
        })?;
        info!(folder = %dir.display(), "Monthly folder ready");
        Ok(dir)
    }

    /// Append `record` to the machine's document, then to the aggregate.
    pub fn persist<T>(&self, identifier: &str, record: &T, at: NaiveDateTime) -> Result<CycleReport, CycleError>
    where
        T: Serialize + ?Sized,
    {
        self.ensure_month_dir(at)?;

        let individual_path = self.individual_path(at, identifier);
        let individual = self
            .coordinator
            .append_with_retry(&individual_path, record)
            .map_err(CycleError::Individual)?;

        let aggregate_path = self.aggregate_path(at);
        match self.coordinator.append_with_retry(&aggregate_path, record) {
            Ok(aggregate) => {
                debug!(
                    individual = %individual_path.display(),
                    aggregate = %aggregate_path.display(),
                    "Cycle persisted"
                );
                Ok(CycleReport { individual, aggregate })
            }
            Err(source) => Err(CycleError::Aggregate { individual, source }),
        }
    }
}

/// File-name-safe form of a machine alias or hostname
pub fn sanitize_identifier(identifier: &str) -> String {
    let cleaned: String = identifier
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        FALLBACK_IDENTIFIER.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppendError;
    use chrono::NaiveDate;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn at(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(5),
            lock_poll_interval: Duration::from_millis(1),
        }
    }

    fn read(path: &Path) -> Vec<Value> {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_layout_paths() {
        let archive = MonthlyArchive::new("/share/SIA", policy());
        let when = at(2024, 3, 9);

        assert_eq!(archive.month_dir(when), PathBuf::from("/share/SIA/2024-03"));
        assert_eq!(
            archive.individual_path(when, "recepcao-01"),
            PathBuf::from("/share/SIA/2024-03/recepcao-01.json")
        );
        assert_eq!(
            archive.aggregate_path(when),
            PathBuf::from("/share/SIA/2024-03/dados_gerais_mensal.json")
        );
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("PC-01"), "PC-01");
        assert_eq!(sanitize_identifier(" sala/2:a "), "sala_2_a");
        assert_eq!(sanitize_identifier("..\\x"), ".._x");
        assert_eq!(sanitize_identifier(""), "unknown-host");
        assert_eq!(sanitize_identifier(".."), "unknown-host");
    }

    #[test]
    fn test_month_dir_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let archive = MonthlyArchive::new(dir.path(), policy());
        let when = at(2024, 5, 1);

        archive.persist("pc-01", &json!({"n": 1}), when).unwrap();
        let report = archive.persist("pc-01", &json!({"n": 2}), at(2024, 5, 31)).unwrap();

        assert_eq!(report.individual.records, 2);
        assert_eq!(report.aggregate.records, 2);
        let months: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(months.len(), 1);
    }

    #[test]
    fn test_persist_writes_both_documents() {
        let dir = tempfile::tempdir().unwrap();
        let archive = MonthlyArchive::new(dir.path(), policy());
        let when = at(2024, 6, 15);

        archive.persist("pc-01", &json!({"host": "pc-01"}), when).unwrap();
        archive.persist("pc-02", &json!({"host": "pc-02"}), when).unwrap();

        assert_eq!(read(&archive.individual_path(when, "pc-01")), vec![json!({"host": "pc-01"})]);
        assert_eq!(read(&archive.individual_path(when, "pc-02")), vec![json!({"host": "pc-02"})]);
        assert_eq!(
            read(&archive.aggregate_path(when)),
            vec![json!({"host": "pc-01"}), json!({"host": "pc-02"})]
        );
    }

    #[test]
    fn test_failed_individual_skips_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let archive = MonthlyArchive::new(dir.path(), policy());
        let when = at(2024, 7, 2);

        archive.ensure_month_dir(when).unwrap();
        let individual = archive.individual_path(when, "pc-01");
        fs::write(&individual, "not json").unwrap();

        let err = archive.persist("pc-01", &json!({"n": 1}), when).unwrap_err();
        match err {
            CycleError::Individual(AppendError::Exhausted { last, .. }) => assert!(last.is_malformed()),
            other => panic!("expected Individual failure, got {other:?}"),
        }
        assert!(!archive.aggregate_path(when).exists());
        assert_eq!(fs::read_to_string(&individual).unwrap(), "not json");
    }

    #[test]
    fn test_failed_aggregate_reports_individual_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let archive = MonthlyArchive::new(dir.path(), policy());
        let when = at(2024, 8, 20);

        archive.ensure_month_dir(when).unwrap();
        fs::write(archive.aggregate_path(when), "{}").unwrap();

        match archive.persist("pc-01", &json!({"n": 1}), when).unwrap_err() {
            CycleError::Aggregate { individual, .. } => assert_eq!(individual.records, 1),
            other => panic!("expected Aggregate failure, got {other:?}"),
        }
        assert_eq!(fs::read_to_string(archive.aggregate_path(when)).unwrap(), "{}");
    }
}
