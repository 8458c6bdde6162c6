//! Per-instance heartbeat files
//!
//! The active instance writes `heartbeat_<pid>.json` into the heartbeat
//! directory so that liveness UIs can show which process is receiving
//! imports. Files older than the configured maximum age are purged by
//! whichever instance notices them.

use crate::io::StoreError;
use crate::io::atomic::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Heartbeat file content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub pid: u32,
}

/// Rate-limited heartbeat file writer for one process
#[derive(Debug)]
pub struct HeartbeatWriter {
    dir: PathBuf,
    pid: u32,
    interval: Duration,
    max_age: Duration,
    last_written: Option<Instant>,
}

impl HeartbeatWriter {
    pub fn new(dir: PathBuf, pid: u32, interval: Duration, max_age: Duration) -> Self {
        Self {
            dir,
            pid,
            interval,
            max_age,
            last_written: None,
        }
    }

    /// Path of this process's heartbeat file
    pub fn path(&self) -> PathBuf {
        heartbeat_path(&self.dir, self.pid)
    }

    /// Write the heartbeat if at least one interval passed since the last
    /// write, then purge expired files. Returns `true` if a write happened.
    pub fn beat(&mut self) -> Result<bool, StoreError> {
        let due = self
            .last_written
            .is_none_or(|at| at.elapsed() >= self.interval);
        if !due {
            return Ok(false);
        }

        self.write_now()?;
        let purged = purge_stale(&self.dir, self.max_age);
        if purged > 0 {
            debug!("Purged {purged} stale heartbeat file(s)");
        }
        Ok(true)
    }

    /// Write the heartbeat unconditionally.
    pub fn write_now(&mut self) -> Result<(), StoreError> {
        let heartbeat = Heartbeat {
            timestamp: Utc::now(),
            pid: self.pid,
        };
        let path = self.path();
        let content = serde_json::to_vec(&heartbeat).map_err(|e| StoreError::Json {
            path: path.clone(),
            source: e,
        })?;
        write_atomic(&path, &content)?;
        self.last_written = Some(Instant::now());
        Ok(())
    }

    /// Remove this process's heartbeat file, if present.
    pub fn remove(&mut self) {
        self.last_written = None;
        let path = self.path();
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove heartbeat {}: {e}", path.display());
            }
        }
    }
}

pub fn heartbeat_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("heartbeat_{pid}.json"))
}

/// Read a heartbeat file. Missing or corrupt files read as `None`.
pub fn read_heartbeat(path: &Path) -> Option<Heartbeat> {
    let content = fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

/// Delete `heartbeat_*.json` files whose modification time is older than
/// `max_age`. Returns the number of files removed.
pub fn purge_stale(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();

    entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with("heartbeat_") && name.ends_with(".json")
        })
        .filter(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > max_age)
        })
        .filter(|e| match fs::remove_file(e.path()) {
            Ok(()) => true,
            Err(err) => {
                debug!("Could not purge {}: {err}", e.path().display());
                false
            }
        })
        .count()
}
