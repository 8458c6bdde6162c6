//! File-backed coordination store
//!
//! The store is the only channel between cooperating processes. Every
//! read-modify-write runs under an exclusive advisory lock on a sibling
//! `.lock` file, so concurrent updaters never silently discard each other's
//! changes. Plain [`CoordinationStore::write`] is still last-writer-wins and
//! is meant for whole-record replacement only.

use crate::io::atomic::write_atomic;
use crate::io::error::StoreError;
use crate::io::hash::RecordVersion;
use crate::io::lock::{DEFAULT_LOCK_TIMEOUT, FileLock, acquire_lock, lock_path_for};
use crate::liveness::LivenessProbe;
use crate::schema::{CoordinationRecord, InstanceDescriptor};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default age after which a record with an unverifiable hub is reclaimable
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);

/// Shared coordination record persisted as a single JSON file
pub struct CoordinationStore {
    path: PathBuf,
    lock_path: PathBuf,
    probe: Arc<dyn LivenessProbe>,
    stale_after: Duration,
    lock_timeout: Duration,
}

impl std::fmt::Debug for CoordinationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationStore")
            .field("path", &self.path)
            .field("stale_after", &self.stale_after)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl CoordinationStore {
    /// Create a store backed by `path`, probing hub liveness with `probe`.
    pub fn new(path: impl Into<PathBuf>, probe: Arc<dyn LivenessProbe>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            probe,
            stale_after: DEFAULT_STALE_AFTER,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the age threshold used when liveness probing is unavailable.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Override how long a store operation waits for the lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn probe(&self) -> &Arc<dyn LivenessProbe> {
        &self.probe
    }

    // ── Raw access ──────────────────────────────────────────────────────────

    /// Read the current record.
    ///
    /// Returns `None` if the file is absent, unreadable, or not a valid record
    /// (e.g. missing `hub_pid`). Never fails.
    pub fn read(&self) -> Option<CoordinationRecord> {
        self.read_versioned().map(|(record, _)| record)
    }

    /// Read the current record together with its content version.
    pub fn read_versioned(&self) -> Option<(CoordinationRecord, RecordVersion)> {
        let content = self.read_bytes()?;
        match serde_json::from_slice::<CoordinationRecord>(&content) {
            Ok(record) => Some((record, RecordVersion::of(&content))),
            Err(e) => {
                debug!("Ignoring invalid coordination record {}: {e}", self.path.display());
                None
            }
        }
    }

    fn read_bytes(&self) -> Option<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!("Failed to read coordination record {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Replace the backing file with `record`, unconditionally.
    ///
    /// Readers never observe a partial file. Concurrent writers are not
    /// serialized: use [`update`](Self::update) for read-modify-write.
    pub fn write(&self, record: &CoordinationRecord) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Json {
            path: self.path.clone(),
            source: e,
        })?;
        write_atomic(&self.path, &content)
    }

    /// Compare-and-swap write.
    ///
    /// Succeeds only if the file still has version `expected` (`None` means the
    /// record must not exist or must be unreadable). Fails with
    /// [`StoreError::Conflict`] otherwise; the caller re-reads and retries.
    pub fn write_if_unchanged(
        &self,
        record: &CoordinationRecord,
        expected: Option<&RecordVersion>,
    ) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        let current = self.read_versioned().map(|(_, version)| version);
        if current.as_ref() != expected {
            return Err(StoreError::Conflict {
                path: self.path.clone(),
            });
        }
        self.write(record)
    }

    fn lock(&self) -> Result<FileLock, StoreError> {
        acquire_lock(&self.lock_path, self.lock_timeout)
    }

    // ── Serialized read-modify-write ────────────────────────────────────────

    /// Apply `modify` to the current record under the store lock.
    ///
    /// Returns `Ok(None)` without writing when no record exists. When `modify`
    /// changes the record it is stamped with `last_update = now` and written
    /// back; an unchanged record is not rewritten.
    pub fn update<T, F>(&self, modify: F) -> Result<Option<T>, StoreError>
    where
        F: FnOnce(&mut CoordinationRecord) -> T,
    {
        let _lock = self.lock()?;
        let Some(mut record) = self.read() else {
            return Ok(None);
        };
        let value = self.modify_locked(&mut record, modify)?;
        Ok(Some(value))
    }

    /// Like [`update`](Self::update), but starts from `seed()` when no valid
    /// record exists.
    pub fn update_or_insert<T, S, F>(&self, seed: S, modify: F) -> Result<T, StoreError>
    where
        S: FnOnce() -> CoordinationRecord,
        F: FnOnce(&mut CoordinationRecord) -> T,
    {
        let _lock = self.lock()?;
        match self.read() {
            Some(mut record) => self.modify_locked(&mut record, modify),
            None => {
                let mut record = seed();
                let value = modify(&mut record);
                record.last_update = Utc::now();
                self.write(&record)?;
                Ok(value)
            }
        }
    }

    fn modify_locked<T, F>(&self, record: &mut CoordinationRecord, modify: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut CoordinationRecord) -> T,
    {
        let before = record.clone();
        let value = modify(record);
        if *record != before {
            record.last_update = Utc::now();
            self.write(record)?;
        }
        Ok(value)
    }

    // ── Coordination operations ─────────────────────────────────────────────

    /// Write a fresh record naming `pid` as hub.
    ///
    /// Refuses with [`StoreError::HubTaken`] if, under the lock, the record
    /// already names a different hub that is still alive. This closes the
    /// window where two simultaneously started processes both elect themselves.
    pub fn register_hub(&self, pid: u32) -> Result<(), StoreError> {
        let _lock = self.lock()?;
        if let Some(existing) = self.read() {
            if existing.hub_pid != pid && self.record_has_live_hub(&existing, self.stale_after) {
                return Err(StoreError::HubTaken {
                    pid: existing.hub_pid,
                });
            }
        }
        self.write(&CoordinationRecord::new_for_hub(pid, Utc::now()))
    }

    /// Register (or refresh) an instance.
    ///
    /// Returns `Ok(false)` when there is no record to join, i.e. the hub went
    /// away since the caller last checked.
    pub fn register_instance(&self, pid: u32, display_name: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let joined = self.update(|record| record.register(pid, display_name, now))?;
        Ok(joined.is_some())
    }

    /// Remove an instance. Clears `active_instance` if it pointed at `pid`.
    ///
    /// Returns `true` if anything was removed.
    pub fn unregister_instance(&self, pid: u32) -> Result<bool, StoreError> {
        Ok(self.update(|record| record.unregister(pid))?.unwrap_or(false))
    }

    pub fn get_active_instance(&self) -> Option<InstanceDescriptor> {
        self.read().and_then(|record| record.active_instance)
    }

    /// Set or clear the active instance. Returns `false` if no record exists.
    pub fn set_active_instance(&self, info: Option<InstanceDescriptor>) -> Result<bool, StoreError> {
        let updated = self.update(|record| record.active_instance = info)?;
        Ok(updated.is_some())
    }

    /// `true` if the record names a hub that is believed to be running.
    ///
    /// Uses the liveness probe when it can answer; otherwise the record is
    /// alive while its `last_update` is no older than `timeout`.
    pub fn is_hub_alive(&self, timeout: Duration) -> bool {
        match self.read() {
            Some(record) => self.record_has_live_hub(&record, timeout),
            None => false,
        }
    }

    fn record_has_live_hub(&self, record: &CoordinationRecord, timeout: Duration) -> bool {
        if record.hub_pid == 0 {
            return false;
        }
        match self.probe.is_alive(record.hub_pid) {
            Some(alive) => alive,
            None => !record.is_stale_at(Utc::now(), timeout),
        }
    }

    /// Delete the backing file. Missing files are not an error.
    pub fn cleanup(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed coordination record {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    /// Delete the backing file only if it still names `pid` as hub.
    ///
    /// A hub that was superseded after being declared stale must not delete
    /// its successor's record. Returns `true` if the file was removed.
    pub fn release_hub(&self, pid: u32) -> Result<bool, StoreError> {
        let _lock = self.lock()?;
        match self.read() {
            Some(record) if record.hub_pid == pid => {
                self.cleanup()?;
                Ok(true)
            }
            Some(record) => {
                warn!(
                    "Not removing coordination record: hub is now pid {} (we are {pid})",
                    record.hub_pid
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
