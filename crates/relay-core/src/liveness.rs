//! Process liveness probing
//!
//! Liveness is checked using `kill(pid, 0)` on Unix, which probes whether the
//! process exists without sending an actual signal. Where no such check is
//! available the probe reports [`None`] and callers fall back to the
//! record-age heuristic, treating the process as alive in the meantime.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

/// Answers "is process `pid` still running?"
pub trait LivenessProbe: Send + Sync {
    /// `Some(alive)` when the check could be performed, `None` when it is
    /// unavailable on this platform or failed for an unexpected reason.
    fn is_alive(&self, pid: u32) -> Option<bool>;

    /// Like [`is_alive`](Self::is_alive) but assumes alive when unknown.
    fn assume_alive(&self, pid: u32) -> bool {
        self.is_alive(pid).unwrap_or(true)
    }
}

/// Probe backed by the operating system's process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessProbe;

impl LivenessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> Option<bool> {
        probe_pid(pid)
    }
}

/// Probe that never knows; forces the timestamp-age fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableProbe;

impl LivenessProbe for UnavailableProbe {
    fn is_alive(&self, _pid: u32) -> Option<bool> {
        None
    }
}

/// Probe with an explicit set of dead pids; every other pid is alive.
///
/// Used to simulate crashed instances without spawning processes.
#[derive(Default)]
pub struct FixedProbe {
    dead: Mutex<HashSet<u32>>,
}

impl FixedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dead(pids: impl IntoIterator<Item = u32>) -> Self {
        let probe = Self::new();
        for pid in pids {
            probe.mark_dead(pid);
        }
        probe
    }

    pub fn mark_dead(&self, pid: u32) {
        self.dead.lock().unwrap_or_else(|e| e.into_inner()).insert(pid);
    }

    pub fn revive(&self, pid: u32) {
        self.dead.lock().unwrap_or_else(|e| e.into_inner()).remove(&pid);
    }
}

impl fmt::Debug for FixedProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedProbe").finish_non_exhaustive()
    }
}

impl LivenessProbe for FixedProbe {
    fn is_alive(&self, pid: u32) -> Option<bool> {
        let dead = self.dead.lock().unwrap_or_else(|e| e.into_inner());
        Some(!dead.contains(&pid))
    }
}

// ── Platform-specific liveness check ─────────────────────────────────────────

#[cfg(unix)]
pub(crate) fn probe_pid(pid: u32) -> Option<bool> {
    // pid 0 and negative pids address process groups, not a single process.
    if pid == 0 || pid > i32::MAX as u32 {
        return Some(false);
    }

    // SAFETY: kill with sig=0 never sends a signal; it only checks PID existence.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return Some(true);
    }

    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Some(false),
        // Exists but owned by another user.
        Some(libc::EPERM) => Some(true),
        _ => None,
    }
}

#[cfg(not(unix))]
pub(crate) fn probe_pid(_pid: u32) -> Option<bool> {
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────
