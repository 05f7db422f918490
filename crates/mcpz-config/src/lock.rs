//! Advisory locks guarding read-modify-write cycles on shared stores.
//!
//! A lock is an OS file lock (`flock` / `LockFileEx`) on a sibling
//! `<file>.lock`. The lock file is never deleted; the OS drops the lock when
//! the holding process exits, so a crashed holder leaves nothing to clean up.

use fs2::FileExt;
use mcpz_core::{McpzError, McpzResult};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default bound on how long to wait for a contended lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// An exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    // unlocked by the OS when the handle closes
    _file: File,
}

impl FileLock {
    /// Acquire the lock guarding `target`, waiting at most `max_wait`.
    ///
    /// Contention past the deadline surfaces as the retryable
    /// [`McpzError::LockTimeout`].
    pub async fn acquire(target: &Path, max_wait: Duration) -> McpzResult<Self> {
        let path = lock_path_for(target);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let deadline = Instant::now() + max_wait;
        let mut delay = INITIAL_BACKOFF;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(lock = %path.display(), "Lock acquired");
                    return Ok(Self { path, _file: file });
                }
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(McpzError::Io(e)),
            }

            if Instant::now() >= deadline {
                return Err(McpzError::LockTimeout(target.display().to_string()));
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }

    /// Path of the lock file itself.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        debug!(lock = %self.path.display(), "Lock released");
    }
}

/// `config.json` is guarded by `config.json.lock`.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
