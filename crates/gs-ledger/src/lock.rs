// lock.rs — Cross-process advisory lock files.
//
// A lock is a file created with `create_new`, so exactly one process can
// hold it. The guard removes the file on drop. A lock file older than
// `stale_after` is assumed to belong to a crashed holder and is broken.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Held lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, waiting up to `wait`.
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] if the lock stays held.
    pub fn acquire(path: &Path, wait: Duration, stale_after: Duration) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let started = SystemTime::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(path, stale_after) {
                        tracing::warn!(lock = %path.display(), "breaking stale lock file");
                        let _ = fs::remove_file(path);
                        continue;
                    }
                    let waited = started.elapsed().unwrap_or_default();
                    if waited >= wait {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("lock {} held for more than {:?}", path.display(), wait),
                        ));
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > stale_after)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        let held = FileLock::acquire(&path, Duration::from_millis(10), Duration::from_secs(60)).unwrap();
        let err = FileLock::acquire(&path, Duration::from_millis(20), Duration::from_secs(60)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        drop(held);
        assert!(!path.exists());
        assert!(FileLock::acquire(&path, Duration::from_millis(10), Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        fs::write(&path, "12345\n").unwrap();
        thread::sleep(Duration::from_millis(30));
        let lock = FileLock::acquire(&path, Duration::from_millis(10), Duration::from_millis(10));
        assert!(lock.is_ok());
    }
}
