// Advisory file locking for registry records.
//
// The lock lives in a sidecar file next to the record directory, never in
// a data file, so the locked critical section can truncate and rewrite
// records freely. Acquisition is bounded: a contended lock surfaces
// LockTimeout instead of hanging the CLI invocation.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

/// Exclusive advisory lock, released on drop.
pub struct LockGuard {
    _flock: Flock<File>,
}

impl LockGuard {
    /// Acquire the lock at `path`, retrying until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<LockGuard> {
        let deadline = Instant::now() + timeout;
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(path)?;
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => return Ok(LockGuard { _flock: flock }),
                Err((_, Errno::EWOULDBLOCK)) => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout(path.display().to_string()));
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err((_, errno)) => return Err(Error::Io(std::io::Error::from(errno))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_can_be_reacquired_after_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.lock");
        let guard = LockGuard::acquire(&path, Duration::from_secs(1)).unwrap();
        drop(guard);
        LockGuard::acquire(&path, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.lock");
        let _held = LockGuard::acquire(&path, Duration::from_secs(1)).unwrap();
        let err = LockGuard::acquire(&path, Duration::from_millis(100));
        assert!(matches!(err, Err(Error::LockTimeout(_))));
    }
}
