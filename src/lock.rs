//! Process-wide advisory lock around controller deliveries.
//!
//! Several bridges may share one controller pane. Each multi-line send holds
//! an exclusive `flock` on a well-known file so keystroke sequences from
//! different bridges never interleave. The lock is released when the guard is
//! dropped, on every exit path.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Default lock file shared by every bridge on the host.
pub const DEFAULT_LOCK_PATH: &str = "/tmp/macs-bridge-send.lock";

/// Held exclusive lock; released on drop.
#[derive(Debug)]
pub struct SendLock {
    file: File,
    path: PathBuf,
}

impl SendLock {
    /// Block until the exclusive lock on `path` is acquired.
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).read(true).write(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options
            .open(path)
            .with_context(|| format!("failed to open send lock: {}", path.display()))?;

        lock_exclusive(&file)
            .with_context(|| format!("failed to lock {}", path.display()))?;
        debug!(lock = %path.display(), "send lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SendLock {
    fn drop(&mut self) {
        if let Err(e) = unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "failed to release send lock");
        } else {
            debug!(lock = %self.path.display(), "send lock released");
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    loop {
        // SAFETY: the descriptor is owned by `file` and open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor is owned by `file` and open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn acquire_creates_lock_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("send.lock");
        let guard = SendLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(guard.path(), path);
    }

    #[test]
    fn reacquire_after_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("send.lock");
        drop(SendLock::acquire(&path).unwrap());
        let _again = SendLock::acquire(&path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn second_holder_waits_for_release() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("send.lock");
        let guard = SendLock::acquire(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        let contender = path.clone();
        let handle = std::thread::spawn(move || {
            let _guard = SendLock::acquire(&contender).unwrap();
            tx.send(()).unwrap();
        });

        // flock locks belong to the open file description, so a second open
        // blocks even within one process.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }
}
