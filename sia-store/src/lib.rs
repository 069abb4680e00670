//! SIA Store - append-only JSON documents on a shared filesystem
//!
//! Lets many uncoordinated agents (possibly on different machines) append
//! records to the same JSON files without a database:
//! - `.lock` marker files for mutual exclusion per document
//! - Load/validate/append/save as one critical section
//! - Bounded retries with exponential backoff and jitter
//! - Corrupted documents are never overwritten

pub mod document;
pub mod error;
pub mod lock;
pub mod monthly;
pub mod retry;

pub use document::LogDocument;
pub use error::{AppendError, CycleError, StoreError};
pub use lock::{LockHolder, LockManager, LockToken};
pub use monthly::{CycleReport, MonthlyArchive, AGGREGATE_DOCUMENT};
pub use retry::{AppendReceipt, Backoff, RetryCoordinator, RetryPolicy, Sleeper, ThreadSleeper};
