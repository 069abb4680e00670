//! Advisory `.lock` markers for shared documents
//!
//! The mutual-exclusion primitive is the exclusive creation of
//! `<document>.lock`: creation fails with `AlreadyExists` while another
//! writer holds it. The creator additionally takes a byte-range lock on the
//! marker, for filesystems that let a second process create a file while
//! another handle on it is still open.
//!
//! Markers carry no lease. A holder that dies without releasing leaves the
//! marker behind and the document stays locked until someone removes it.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::StoreError;

pub const LOCK_SUFFIX: &str = ".lock";

/// Default pause between two creation attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `<document>.lock`, next to the document itself
pub fn lock_path_for(document: &Path) -> PathBuf {
    let mut name = OsString::from(document.as_os_str());
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Note written inside a marker to identify who holds it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: String,
}

impl LockHolder {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            acquired_at: Local::now().format("%d/%m/%Y %H:%M:%S").to_string(),
        }
    }

    /// Read the note of whoever holds `lock_path`, if any is readable
    pub fn read(lock_path: &Path) -> Option<Self> {
        let content = fs::read(lock_path).ok()?;
        serde_json::from_slice(&content).ok()
    }
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid {} on {} since {}", self.pid, self.hostname, self.acquired_at)
    }
}

/// Acquires `.lock` markers, polling until a timeout
#[derive(Debug, Clone)]
pub struct LockManager {
    poll_interval: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl LockManager {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Single non-blocking attempt to take the marker of `document`
    pub fn try_acquire(&self, document: &Path) -> io::Result<LockToken> {
        self.try_acquire_with(document, |file| file.try_lock_exclusive())
    }

    fn try_acquire_with<F>(&self, document: &Path, byte_lock: F) -> io::Result<LockToken>
    where
        F: FnOnce(&File) -> io::Result<()>,
    {
        let lock_path = lock_path_for(document);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&lock_path)?;

        if let Err(e) = byte_lock(&file) {
            // Contended: the marker belongs to whoever holds the byte-range lock.
            // Anything else: nobody holds it, so ours must not outlive this call.
            if !is_contended(&e) {
                drop(file);
                if let Err(rm) = fs::remove_file(&lock_path) {
                    error!(lock = %lock_path.display(), error = %rm, "Could not remove unlockable marker");
                }
            }
            return Err(e);
        }

        if let Err(e) = write_holder(&mut file) {
            debug!(lock = %lock_path.display(), error = %e, "Could not write lock holder note");
        }

        Ok(LockToken {
            file: Some(file),
            lock_path,
            document: document.to_path_buf(),
        })
    }

    /// Poll `try_acquire` every `poll_interval` until `timeout` elapses.
    ///
    /// At least one attempt is always made. Every failure kind (marker
    /// present, permission denied, other I/O errors) is retried; callers must
    /// treat `LockUnavailable` as "could not acquire", never as "no lock needed".
    pub fn acquire(&self, document: &Path, timeout: Duration) -> Result<LockToken, StoreError> {
        let start = Instant::now();

        loop {
            match self.try_acquire(document) {
                Ok(token) => {
                    debug!(document = %document.display(), "Lock acquired");
                    return Ok(token);
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::AlreadyExists | io::ErrorKind::WouldBlock => {
                        debug!(document = %document.display(), "Lock marker already held, waiting");
                    }
                    io::ErrorKind::PermissionDenied => {
                        debug!(document = %document.display(), "Permission denied on lock marker, waiting");
                    }
                    _ => {
                        warn!(document = %document.display(), error = %e, "Unexpected error acquiring lock, waiting");
                    }
                },
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }
            std::thread::sleep(self.poll_interval.min(timeout - elapsed));
        }

        let holder = LockHolder::read(&lock_path_for(document)).map(|h| h.to_string());
        warn!(
            document = %document.display(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            holder = holder.as_deref().unwrap_or("unknown"),
            "Could not acquire lock"
        );

        Err(StoreError::LockUnavailable {
            path: document.to_path_buf(),
            waited: start.elapsed(),
            holder,
        })
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (e.raw_os_error().is_some() && e.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

fn write_holder(file: &mut File) -> io::Result<()> {
    let note = serde_json::to_vec(&LockHolder::current())?;
    file.write_all(&note)?;
    file.flush()
}

/// Held `.lock` marker for one document.
///
/// Released by `release`, or on drop when an error path unwinds past it.
#[derive(Debug)]
pub struct LockToken {
    file: Option<File>,
    lock_path: PathBuf,
    document: PathBuf,
}

impl LockToken {
    /// Document this token grants access to
    pub fn document(&self) -> &Path {
        &self.document
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Whether this token guards `document`
    pub fn covers(&self, document: &Path) -> bool {
        self.document == document
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };

        if let Err(e) = FileExt::unlock(&file) {
            debug!(lock = %self.lock_path.display(), error = %e, "Byte-range unlock failed");
        }
        // Windows refuses to delete a file that still has an open handle.
        drop(file);

        match fs::remove_file(&self.lock_path) {
            Ok(()) => debug!(lock = %self.lock_path.display(), "Lock released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(lock = %self.lock_path.display(), error = %e, "Failed to release lock"),
        }
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.release_inner();
    }
}
