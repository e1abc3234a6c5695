//! File-based advisory locking using `flock(2)` directly.
//!
//! Uses raw `libc::flock` instead of an RAII lock wrapper crate to avoid the
//! self-referential struct problem: an RAII guard borrows the lock owner,
//! making it impossible to store both in the same struct without lifetime
//! gymnastics. By calling `flock(2)` directly we only need to own the
//! `File` (which owns the fd); `Drop` calls `flock(fd, LOCK_UN)` to release.
//!
//! Used by the Log Store (spec §4.C, one lock per session at
//! `locks/log.lock`) and available to any other component needing an
//! advisory exclusive file lock scoped to a session directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    name: String,
    acquired_at: DateTime<Utc>,
    reason: String,
}

/// Advisory exclusive lock guard backed by `flock(2)`.
pub struct FileLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid fd owned by `self.file`; `LOCK_UN` releases
        // the advisory lock acquired in `acquire`.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl FileLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Acquire a non-blocking exclusive lock scoped to a session directory.
///
/// Lock path: `{session_dir}/locks/{name}.lock`. On success, writes a
/// diagnostic JSON blob (pid, name, acquired_at, reason) into the lock file.
/// On contention, returns an error naming the current holder's pid/reason.
pub fn acquire(session_dir: &Path, name: &str, reason: &str) -> Result<FileLock> {
    let locks_dir = session_dir.join("locks");
    fs::create_dir_all(&locks_dir)
        .with_context(|| format!("failed to create locks directory: {}", locks_dir.display()))?;

    let lock_path = locks_dir.join(format!("{name}.lock"));

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open lock file: {}", lock_path.display()))?;

    let fd = file.as_raw_fd();

    // SAFETY: `fd` is valid; `LOCK_EX | LOCK_NB` requests a non-blocking
    // exclusive lock and the return value is checked below.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

    if ret == 0 {
        let mut lock = FileLock { file, lock_path };
        let diagnostic = LockDiagnostic {
            pid: std::process::id(),
            name: name.to_string(),
            acquired_at: Utc::now(),
            reason: reason.to_string(),
        };
        let json = serde_json::to_string(&diagnostic).context("failed to serialize lock diagnostic")?;
        lock.file.set_len(0).context("failed to truncate lock file")?;
        lock.file
            .write_all(json.as_bytes())
            .context("failed to write lock diagnostic")?;
        lock.file.flush().context("failed to flush lock file")?;
        Ok(lock)
    } else {
        let mut diag_file =
            File::open(&lock_path).context("failed to open lock file to read diagnostic")?;
        let mut contents = String::new();
        diag_file
            .read_to_string(&mut contents)
            .context("failed to read lock file")?;

        let error_msg = if let Ok(diagnostic) = serde_json::from_str::<LockDiagnostic>(&contents) {
            format!(
                "locked by pid {} (name: {}, reason: {}, acquired: {})",
                diagnostic.pid, diagnostic.name, diagnostic.reason, diagnostic.acquired_at
            )
        } else {
            "locked (unable to read diagnostic info)".to_string()
        };
        Err(anyhow::anyhow!(error_msg))
    }
}
