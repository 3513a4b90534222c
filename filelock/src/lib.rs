//! Advisory file locking around mutations of per-project JSON state
//! (dedup memory, learnings, sectors, run-state), grounded on `fs2`'s
//! file-locking idiom.
//!
//! The lock is a sibling file `<path>.lock`, created with `O_CREAT |
//! O_EXCL` and held with an OS advisory lock on top for extra safety. A
//! stale lock (older than [`STALE_THRESHOLD`]) from a crashed holder is
//! removed and retried. If the lock still can't be acquired after a
//! bounded number of attempts, the critical section runs anyway rather
//! than stalling the whole engine — callers get a guard back either way
//! and can check [`FileLockGuard::is_held`] if they care.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs2::FileExt;

/// Age after which an existing lock file is assumed to be left behind by
/// a crashed process rather than a live holder.
pub const STALE_THRESHOLD: Duration = Duration::from_secs(10);

const RETRY_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// A held (or best-effort-attempted) lock on `<path>.lock`.
///
/// Released on drop: the OS lock is released and the lock file removed,
/// but only if this guard actually holds it — a guard returned from the
/// graceful-fallback path leaves no file behind to clean up.
pub struct FileLockGuard {
    lock_path: PathBuf,
    file: Option<File>,
}

impl FileLockGuard {
    /// Whether this guard actually holds the lock, as opposed to having
    /// fallen through to the graceful-fallback path after exhausting
    /// retries.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut lock_path = target.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

fn is_stale(lock_path: &Path) -> bool {
    let Ok(meta) = fs::metadata(lock_path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > STALE_THRESHOLD)
        .unwrap_or(false)
}

/// Acquire the advisory lock guarding `target`, creating parent
/// directories as needed.
///
/// Never returns an error for contention: if the lock cannot be obtained
/// within the retry budget, the returned guard is unheld
/// (`is_held() == false`) and the caller proceeds without exclusion
/// rather than stalling the engine.
pub fn acquire(target: &Path) -> io::Result<FileLockGuard> {
    let lock_path = lock_path_for(target);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }

    for attempt in 0..RETRY_ATTEMPTS {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => {
                if let Err(err) = file.try_lock_exclusive() {
                    let _ = fs::remove_file(&lock_path);
                    return Err(err);
                }
                return Ok(FileLockGuard {
                    lock_path,
                    file: Some(file),
                });
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if is_stale(&lock_path) {
                    tracing::warn!(path = %lock_path.display(), "removing stale lock");
                    let _ = fs::remove_file(&lock_path);
                    continue;
                }
                if attempt + 1 < RETRY_ATTEMPTS {
                    std::thread::sleep(RETRY_DELAY);
                }
            }
            Err(err) => return Err(err),
        }
    }

    tracing::warn!(
        path = %lock_path.display(),
        "lock still contended after retry budget, proceeding without exclusion"
    );
    Ok(FileLockGuard {
        lock_path,
        file: None,
    })
}
