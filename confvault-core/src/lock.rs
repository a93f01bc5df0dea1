//! Cross-process exclusion for writers sharing one configuration root.
//!
//! Every [`crate::WriteSection`] holds an exclusive `flock` on
//! `<meta>/LOCK` for its whole lifetime, so a `watch` process, a CLI
//! `commit` and a `prune` never interleave their object writes, HEAD
//! updates and sweeps. The lock is released when the file is closed, which
//! also covers a writer that dies mid-section.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub const LOCK_FILE: &str = "LOCK";

/// Held exclusive lock on a repository's lock file.
#[derive(Debug)]
pub struct RootLock {
    _file: File,
}

impl RootLock {
    /// Block until the exclusive lock on `path` is ours.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        flock_exclusive(&file)?;
        Ok(Self { _file: file })
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        if try_flock_exclusive(&file)? {
            Ok(Some(Self { _file: file }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(unix)]
fn flock_exclusive(file: &File) -> Result<()> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    loop {
        match flock(file.as_raw_fd(), FlockArg::LockExclusive) {
            Ok(()) => return Ok(()),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(std::io::Error::from(e).into()),
        }
    }
}

#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}

// Elsewhere only the in-process write mutex applies.
#[cfg(not(unix))]
fn flock_exclusive(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

/// Whether a process with `pid` still exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks existence.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive_across_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta").join(LOCK_FILE);

        let held = RootLock::acquire(&path).unwrap();
        assert!(path.is_file());
        assert!(RootLock::try_acquire(&path).unwrap().is_none());

        drop(held);
        assert!(RootLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE);
        let held = RootLock::acquire(&path).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let path = path.clone();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _lock = RootLock::acquire(&path).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(held);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_process_alive() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(999_999_999));
    }
}
