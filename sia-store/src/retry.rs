//! Bounded retries around one append
//!
//! Each attempt runs the whole critical section: acquire the document's
//! lock (waiting at most the current backoff), load, append, save, release.
//! Lock contention, I/O errors and malformed content all fall through to the
//! same backoff; a malformed document is reported, never rewritten.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::document::LogDocument;
use crate::error::{AppendError, StoreError};
use crate::lock::{LockManager, DEFAULT_POLL_INTERVAL};

/// Jitter is drawn from `[0, base / JITTER_DIVISOR]`
const JITTER_DIVISOR: u32 = 10;

/// Retry tuning for `append_with_retry`
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per append; 0 is treated as 1
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Pause between two lock creation attempts
    pub lock_poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            lock_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Exponential backoff with 10% jitter, capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { current: initial, max }
    }

    /// Pre-jitter delay of the coming round
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Delay to sleep for this round; doubles the base for the next one.
    ///
    /// Returns `min(base + uniform(0, base * 0.1), max)`.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let base = self.current;
        let jitter = rng.gen_range(Duration::ZERO..=base / JITTER_DIVISOR);
        self.current = base.saturating_mul(2);
        base.saturating_add(jitter).min(self.max)
    }
}

/// Blocking pause between attempts
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Successful append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub path: PathBuf,
    /// 1-based attempt that succeeded
    pub attempt: u32,
    /// Length of the document after the append
    pub records: usize,
}

/// Runs appends under the lock with bounded retries
#[derive(Debug, Clone)]
pub struct RetryCoordinator<S = ThreadSleeper> {
    policy: RetryPolicy,
    locks: LockManager,
    sleeper: S,
}

impl RetryCoordinator<ThreadSleeper> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, ThreadSleeper)
    }
}

impl<S: Sleeper> RetryCoordinator<S> {
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        let locks = LockManager::new(policy.lock_poll_interval);
        Self { policy, locks, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Append `record` to the JSON array at `path`.
    ///
    /// On failure the document is left exactly as it was found.
    pub fn append_with_retry<T>(&self, path: &Path, record: &T) -> Result<AppendReceipt, AppendError>
    where
        T: Serialize + ?Sized,
    {
        let record = serde_json::to_value(record)?;
        let document = LogDocument::new(path);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = Backoff::new(self.policy.initial_backoff, self.policy.max_backoff);
        let mut rng = rand::thread_rng();
        let mut last = None;

        for attempt in 1..=max_attempts {
            let lock_timeout = backoff.current().min(self.policy.max_backoff);
            match self.attempt(&document, &record, lock_timeout) {
                Ok(records) => {
                    info!(document = %path.display(), attempt, records, "Document updated");
                    return Ok(AppendReceipt {
                        path: path.to_path_buf(),
                        attempt,
                        records,
                    });
                }
                Err(e) => {
                    let is_final = attempt == max_attempts;
                    let retry_in = (!is_final).then(|| backoff.next_delay(&mut rng));
                    log_failed_attempt(path, attempt, max_attempts, &e, retry_in);
                    last = Some(e);
                    if let Some(delay) = retry_in {
                        self.sleeper.sleep(delay);
                    }
                }
            }
        }

        error!(
            document = %path.display(),
            attempts = max_attempts,
            "Critical: document not updated after all attempts; record not saved, existing file kept as found"
        );

        let last = last.unwrap_or_else(|| StoreError::LockUnavailable {
            path: path.to_path_buf(),
            waited: Duration::ZERO,
            holder: None,
        });
        Err(AppendError::Exhausted {
            path: path.to_path_buf(),
            attempts: max_attempts,
            last,
        })
    }

    /// One critical section; the token is released on every path out.
    fn attempt(&self, document: &LogDocument, record: &Value, lock_timeout: Duration) -> Result<usize, StoreError> {
        let token = self.locks.acquire(document.path(), lock_timeout)?;

        let mut records = document.load_or_empty(&token)?;
        records.push(record.clone());
        document.save(&token, &records)?;

        token.release();
        Ok(records.len())
    }
}

fn log_failed_attempt(path: &Path, attempt: u32, max_attempts: u32, err: &StoreError, retry_in: Option<Duration>) {
    let retry_in_ms = retry_in.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

    match (err.is_malformed(), retry_in_ms) {
        (true, Some(ms)) => warn!(
            document = %path.display(), attempt, max_attempts, retry_in_ms = ms, error = %err,
            "Malformed document, existing file will NOT be overwritten"
        ),
        (true, None) => error!(
            document = %path.display(), attempt, max_attempts, error = %err,
            "Malformed document, existing file will NOT be overwritten"
        ),
        (false, Some(ms)) => warn!(
            document = %path.display(), attempt, max_attempts, retry_in_ms = ms, error = %err,
            "Append attempt failed"
        ),
        (false, None) => error!(
            document = %path.display(), attempt, max_attempts, error = %err,
            "Append attempt failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::lock_path_for;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::fs;

    /// Records requested pauses instead of sleeping
    #[derive(Default)]
    struct RecordingSleeper {
        pauses: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.pauses.lock().push(duration);
        }
    }

    fn within_jitter(delay: Duration, base: Duration) -> bool {
        delay.as_nanos() * 10 <= base.as_nanos() * 11
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(4),
            max_backoff: Duration::from_millis(20),
            lock_poll_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles_with_bounded_jitter() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60));
        let mut rng = rand::thread_rng();

        let mut base = Duration::from_millis(100);
        for _ in 0..6 {
            let delay = backoff.next_delay(&mut rng);
            assert!(delay >= base, "{delay:?} < {base:?}");
            assert!(within_jitter(delay, base), "{delay:?} > 1.1 * {base:?}");
            base *= 2;
            assert_eq!(backoff.current(), base);
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(40), Duration::from_secs(60));
        let mut rng = rand::thread_rng();

        let first = backoff.next_delay(&mut rng);
        assert!(first >= Duration::from_secs(40) && first <= Duration::from_secs(44));
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(&mut rng), Duration::from_secs(60));
    }

    #[test]
    fn test_persistent_contention_delays_grow_and_stay_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("busy.json");
        fs::write(lock_path_for(&doc), b"").unwrap();

        let policy = fast_policy(6);
        let coordinator = RetryCoordinator::with_sleeper(policy.clone(), RecordingSleeper::default());
        let err = coordinator.append_with_retry(&doc, &json!({"n": 1})).unwrap_err();

        match err {
            AppendError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 6);
                assert!(matches!(last, StoreError::LockUnavailable { .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }

        let pauses = coordinator.sleeper().pauses.lock().clone();
        assert_eq!(pauses.len(), 5);

        let mut base = policy.initial_backoff;
        for pair in pauses.windows(2) {
            assert!(pair[0] <= pair[1], "delays must not decrease: {pauses:?}");
        }
        for pause in &pauses {
            assert!(*pause <= policy.max_backoff);
            assert!(*pause >= base.min(policy.max_backoff));
            assert!(*pause == policy.max_backoff || within_jitter(*pause, base));
            base *= 2;
        }
        assert!(!doc.exists());
    }

    #[test]
    fn test_corrupted_document_is_byte_identical_after_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("corrupt.json");
        let corrupted = br#"{"oops": true}"#;
        fs::write(&doc, corrupted).unwrap();

        let coordinator = RetryCoordinator::with_sleeper(fast_policy(3), RecordingSleeper::default());
        let err = coordinator.append_with_retry(&doc, &json!({"n": 1})).unwrap_err();

        match err {
            AppendError::Exhausted { last, .. } => assert!(last.is_malformed()),
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert_eq!(fs::read(&doc).unwrap(), corrupted);
        assert!(!lock_path_for(&doc).exists(), "lock must be released after each attempt");
    }

    #[test]
    fn test_failed_save_releases_lock_and_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        // The marker name still fits, the sibling temp file used by save does not
        let doc = dir.path().join(format!("{}.json", "a".repeat(243)));

        let coordinator = RetryCoordinator::with_sleeper(fast_policy(2), RecordingSleeper::default());
        let err = coordinator.append_with_retry(&doc, &json!({"n": 1})).unwrap_err();

        match err {
            AppendError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(last, StoreError::Io { .. }), "expected Io, got {last:?}");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
        assert!(!lock_path_for(&doc).exists(), "lock must be released when save fails");
        assert!(!doc.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_round_trip_into_absent_document() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("new.json");
        let record = json!({
            "hostname": "pc-01",
            "machine_alias": "recepcao",
            "timestamp_coleta": "01/05/2024 08:00:00",
            "monitoramento": {"cpu": {"percentual_uso": 12.5}, "discos_adicionais": []}
        });

        let receipt = RetryCoordinator::new(fast_policy(1))
            .append_with_retry(&doc, &record)
            .unwrap();
        assert_eq!(receipt.attempt, 1);
        assert_eq!(receipt.records, 1);

        let stored: Vec<Value> = serde_json::from_slice(&fs::read(&doc).unwrap()).unwrap();
        assert_eq!(stored, vec![record]);
    }

    #[test]
    fn test_append_keeps_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("log.json");
        fs::write(&doc, r#"[{"n": 1}, {"n": 2}]"#).unwrap();

        let receipt = RetryCoordinator::new(fast_policy(1))
            .append_with_retry(&doc, &json!({"n": 3}))
            .unwrap();
        assert_eq!(receipt.records, 3);

        let stored: Vec<Value> = serde_json::from_slice(&fs::read(&doc).unwrap()).unwrap();
        assert_eq!(stored, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
    }

    #[test]
    fn test_success_after_lock_is_freed_stops_retrying() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("contended.json");
        let marker = lock_path_for(&doc);
        fs::write(&marker, b"").unwrap();

        struct FreeingSleeper {
            marker: PathBuf,
            pauses: Mutex<u32>,
        }
        impl Sleeper for FreeingSleeper {
            fn sleep(&self, _duration: Duration) {
                *self.pauses.lock() += 1;
                let _ = fs::remove_file(&self.marker);
            }
        }

        let sleeper = FreeingSleeper { marker, pauses: Mutex::new(0) };
        let coordinator = RetryCoordinator::with_sleeper(fast_policy(5), sleeper);
        let receipt = coordinator.append_with_retry(&doc, &json!({"n": 1})).unwrap();

        assert_eq!(receipt.attempt, 2);
        assert_eq!(*coordinator.sleeper().pauses.lock(), 1);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("log.json");

        let receipt = RetryCoordinator::new(fast_policy(0))
            .append_with_retry(&doc, &json!({"n": 1}))
            .unwrap();
        assert_eq!(receipt.attempt, 1);
    }
}
