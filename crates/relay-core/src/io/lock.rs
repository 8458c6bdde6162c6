//! Advisory file locking with bounded backoff
//!
//! Every read-modify-write of the coordination record runs while holding an
//! exclusive lock on a sibling `.lock` file, which serializes writers across
//! processes. Readers do not lock; they rely on the atomic rename in
//! [`super::atomic::write_atomic`].
//!
//! On Unix the lock is `flock`, which the kernel drops when the holder exits.
//! Elsewhere the lock is a marker file holding the owner's pid; a marker whose
//! owner is gone, or which outlived [`ABANDONED_MARKER_AGE`], is broken.

use crate::io::error::StoreError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::warn;

#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Default time the coordination store waits for its lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A marker lock older than this is treated as left behind by a crash.
/// Store operations hold the lock for milliseconds.
pub const ABANDONED_MARKER_AGE: Duration = Duration::from_secs(5);

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(100);

/// File lock guard that automatically releases on drop
pub struct FileLock {
    held: Held,
}

enum Held {
    #[cfg(unix)]
    Flock(File),
    #[cfg_attr(unix, allow(dead_code))]
    Marker(PathBuf),
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match &self.held {
            #[cfg(unix)]
            Held::Flock(file) => {
                // SAFETY: the descriptor belongs to `file`, which is still open here.
                unsafe {
                    libc::flock(file.as_raw_fd(), libc::LOCK_UN);
                }
            }
            Held::Marker(path) => {
                let _ = fs::remove_file(path);
            }
        }
    }
}

/// Acquire an exclusive lock on `path`, waiting up to `timeout`.
///
/// Between attempts the wait starts at 5ms and doubles up to 100ms, so a
/// waiter keeps polling at a steady rate under sustained contention. The lock
/// file is created if missing and is never deleted on Unix.
///
/// Returns `StoreError::LockTimeout` if the lock is still held once `timeout`
/// has passed.
pub fn acquire_lock(path: &Path, timeout: Duration) -> Result<FileLock, StoreError> {
    ensure_parent(path)?;

    #[cfg(unix)]
    {
        let file = open_lock_file(path)?;
        wait_for(path, timeout, || try_flock(path, &file))?;
        Ok(FileLock { held: Held::Flock(file) })
    }

    #[cfg(not(unix))]
    {
        acquire_marker_lock(path, timeout)
    }
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    Ok(())
}

fn backoff(attempt: u32) -> Duration {
    INITIAL_BACKOFF.saturating_mul(1u32 << attempt.min(16)).min(MAX_BACKOFF)
}

/// Call `attempt` until it reports success or the deadline passes.
fn wait_for<F>(path: &Path, timeout: Duration, mut attempt: F) -> Result<(), StoreError>
where
    F: FnMut() -> Result<bool, StoreError>,
{
    let deadline = Instant::now() + timeout;
    let mut tries = 0;
    loop {
        if attempt()? {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(StoreError::LockTimeout {
                path: path.to_path_buf(),
                waited: timeout,
            });
        }
        std::thread::sleep(backoff(tries).min(deadline - now));
        tries = tries.saturating_add(1);
    }
}

#[cfg(unix)]
fn open_lock_file(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(unix)]
fn try_flock(path: &Path, file: &File) -> Result<bool, StoreError> {
    // SAFETY: the descriptor is valid for the lifetime of `file`.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    let would_block =
        err.raw_os_error() == Some(libc::EWOULDBLOCK) || err.raw_os_error() == Some(libc::EAGAIN);
    if would_block {
        Ok(false)
    } else {
        Err(StoreError::io(path, err))
    }
}

/// Marker-file lock: the lock is the existence of `path`, which holds the
/// owner's pid.
#[cfg_attr(unix, allow(dead_code))]
fn acquire_marker_lock(path: &Path, timeout: Duration) -> Result<FileLock, StoreError> {
    ensure_parent(path)?;
    wait_for(path, timeout, || try_create_marker(path))?;
    Ok(FileLock {
        held: Held::Marker(path.to_path_buf()),
    })
}

#[cfg_attr(unix, allow(dead_code))]
fn try_create_marker(path: &Path) -> Result<bool, StoreError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            // An empty marker still locks; it just ages out instead of being
            // matched against a dead pid.
            let _ = write!(file, "{}", std::process::id());
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if marker_is_abandoned(path) {
                warn!("Breaking abandoned lock {}", path.display());
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StoreError::io(path, e)),
                }
            }
            Ok(false)
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// `true` when the marker's owner is known dead or the marker is too old.
#[cfg_attr(unix, allow(dead_code))]
fn marker_is_abandoned(path: &Path) -> bool {
    let owner = fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());
    if owner.is_some_and(|pid| crate::liveness::probe_pid(pid) == Some(false)) {
        return true;
    }

    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > ABANDONED_MARKER_AGE)
}

/// Lock file path used for a given data file (`coordination.json` -> `coordination.lock`)
pub fn lock_path_for(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn test_lock_creates_file_and_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runtime/asset-relay/coordination.lock");

        let guard = acquire_lock(&path, Duration::ZERO).unwrap();
        assert!(path.is_file());
        drop(guard);

        // Released on drop, so an immediate re-acquire without waiting works.
        let _again = acquire_lock(&path, Duration::ZERO).unwrap();
    }

    #[test]
    fn test_lock_serializes_counter_updates() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("counter.txt");
        let lock = lock_path_for(&counter);
        std::fs::write(&counter, "0").unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _guard = acquire_lock(&lock, DEFAULT_LOCK_TIMEOUT).unwrap();
                        let n: u32 = std::fs::read_to_string(&counter).unwrap().parse().unwrap();
                        std::fs::write(&counter, (n + 1).to_string()).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(std::fs::read_to_string(&counter).unwrap(), "160");
    }

    #[test]
    fn test_waiter_gets_lock_once_slow_holder_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordination.lock");
        let (held_tx, held_rx) = mpsc::channel();

        let holder_path = path.clone();
        let holder = thread::spawn(move || {
            let _guard = acquire_lock(&holder_path, Duration::ZERO).unwrap();
            held_tx.send(()).unwrap();
            // Longer than the old fixed retry schedule allowed for
            thread::sleep(Duration::from_millis(2000));
        });

        held_rx.recv().unwrap();
        let started = Instant::now();
        let _guard = acquire_lock(&path, DEFAULT_LOCK_TIMEOUT).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1500));
        holder.join().unwrap();
    }

    #[test]
    fn test_contended_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordination.lock");
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let holder_path = path.clone();
        let holder = thread::spawn(move || {
            let _guard = acquire_lock(&holder_path, Duration::ZERO).unwrap();
            held_tx.send(()).unwrap();
            let _ = done_rx.recv();
        });

        held_rx.recv().unwrap();
        let result = acquire_lock(&path, SHORT);
        assert!(matches!(result, Err(StoreError::LockTimeout { waited, .. }) if waited == SHORT));

        done_tx.send(()).unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        assert_eq!(backoff(0), Duration::from_millis(5));
        assert_eq!(backoff(2), Duration::from_millis(20));
        assert_eq!(backoff(5), MAX_BACKOFF);
        assert_eq!(backoff(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn test_marker_lock_excludes_and_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordination.lock");

        let guard = acquire_marker_lock(&path, Duration::ZERO).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
        assert!(matches!(
            acquire_marker_lock(&path, SHORT),
            Err(StoreError::LockTimeout { .. })
        ));

        drop(guard);
        assert!(!path.exists());
        let _again = acquire_marker_lock(&path, Duration::ZERO).unwrap();
    }

    #[test]
    #[cfg(unix)]
    fn test_marker_left_by_dead_owner_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordination.lock");
        // i32::MAX is outside the kernel pid range, so the owner reads as dead.
        std::fs::write(&path, (i32::MAX as u32).to_string()).unwrap();

        let _guard = acquire_marker_lock(&path, SHORT).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_old_marker_without_owner_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordination.lock");
        let file = std::fs::File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        drop(file);

        let _guard = acquire_marker_lock(&path, SHORT).unwrap();
    }

    #[test]
    fn test_fresh_marker_of_live_owner_is_respected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coordination.lock");
        std::fs::write(&path, std::process::id().to_string()).unwrap();

        assert!(matches!(
            acquire_marker_lock(&path, SHORT),
            Err(StoreError::LockTimeout { .. })
        ));
        assert!(path.exists());
    }

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/asset-relay/coordination.json")),
            PathBuf::from("/tmp/asset-relay/coordination.lock")
        );
    }
}
