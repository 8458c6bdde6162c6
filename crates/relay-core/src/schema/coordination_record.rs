//! Coordination record schema shared by every cooperating process

use super::ImportRequest;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The single persisted coordination document
///
/// Stored as JSON at a well-known path (see [`crate::home::default_record_path`]).
/// `hub_pid` is the only required field; a document without it is treated as
/// absent by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationRecord {
    /// Process id of the current hub
    pub hub_pid: u32,

    /// Stamped on every write
    #[serde(default = "unix_epoch")]
    pub last_update: DateTime<Utc>,

    /// The instance currently receiving routed imports, if any
    #[serde(default)]
    pub active_instance: Option<InstanceDescriptor>,

    /// Registered instances in registration order, unique by pid
    #[serde(default)]
    pub registered_instances: Vec<RegisteredInstance>,

    /// At most one pending batch per target pid
    #[serde(default)]
    pub pending_import: BTreeMap<u32, PendingImport>,

    /// Outstanding request for an instance to surface its window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_window: Option<ShowWindowSignal>,
}

/// Identity of an instance eligible to be active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub pid: u32,
    pub display_name: String,
    /// Opaque native window handle, when the host exposes one
    #[serde(default)]
    pub window_handle: Option<u64>,
}

/// Entry in [`CoordinationRecord::registered_instances`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredInstance {
    pub pid: u32,
    pub display_name: String,
    /// When the instance last (re)registered; liveness comes from the probe
    #[serde(default = "unix_epoch")]
    pub last_seen: DateTime<Utc>,
}

/// Batch of import requests routed to a non-hub instance
///
/// Requests appended to an existing batch keep their own `queued_at`, so each
/// request ages from the moment it was routed rather than from the latest
/// append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingImport {
    pub requests: Vec<QueuedRequest>,
    /// When the batch was first written; appends leave it unchanged
    pub timestamp: DateTime<Utc>,
}

/// One routed request inside a [`PendingImport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    #[serde(flatten)]
    pub request: ImportRequest,
    /// Missing in batches written without per-request times; the batch
    /// timestamp applies then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
}

impl PendingImport {
    pub fn new(requests: Vec<ImportRequest>, now: DateTime<Utc>) -> Self {
        let mut batch = Self {
            requests: Vec::new(),
            timestamp: now,
        };
        batch.append(requests, now);
        batch
    }

    /// Add requests queued at `now` behind the ones already waiting.
    pub fn append(&mut self, requests: Vec<ImportRequest>, now: DateTime<Utc>) {
        self.requests.extend(requests.into_iter().map(|request| QueuedRequest {
            request,
            queued_at: Some(now),
        }));
    }

    /// Split the batch at `now` into the requests still younger than `ttl`, in
    /// order, and the number that expired.
    pub fn into_fresh(self, now: DateTime<Utc>, ttl: std::time::Duration) -> (Vec<ImportRequest>, usize) {
        let batch_time = self.timestamp;
        let mut expired = 0;
        let fresh = self
            .requests
            .into_iter()
            .filter_map(|queued| {
                let age = (now - queued.queued_at.unwrap_or(batch_time))
                    .to_std()
                    .unwrap_or_default();
                if age > ttl {
                    expired += 1;
                    None
                } else {
                    Some(queued.request)
                }
            })
            .collect();
        (fresh, expired)
    }
}

/// Request for `target_pid` to bring its window to the foreground.
///
/// The target clears the signal once it has acted on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowWindowSignal {
    pub target_pid: u32,
    pub requester_pid: u32,
    pub requested_at: DateTime<Utc>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl CoordinationRecord {
    /// Fresh record for a newly elected hub: no active instance, no registrants.
    pub fn new_for_hub(hub_pid: u32, now: DateTime<Utc>) -> Self {
        Self {
            hub_pid,
            last_update: now,
            active_instance: None,
            registered_instances: Vec::new(),
            pending_import: BTreeMap::new(),
            show_window: None,
        }
    }

    /// Pid of the active instance, if one is set.
    pub fn active_pid(&self) -> Option<u32> {
        self.active_instance.as_ref().map(|a| a.pid)
    }

    pub fn is_active(&self, pid: u32) -> bool {
        self.active_pid() == Some(pid)
    }

    /// Insert or refresh a registration.
    ///
    /// An existing entry keeps its position; its name and `last_seen` are updated.
    pub fn register(&mut self, pid: u32, display_name: &str, now: DateTime<Utc>) {
        if let Some(existing) = self.registered_instances.iter_mut().find(|i| i.pid == pid) {
            existing.display_name = display_name.to_string();
            existing.last_seen = now;
            return;
        }
        self.registered_instances.push(RegisteredInstance {
            pid,
            display_name: display_name.to_string(),
            last_seen: now,
        });
    }

    /// Remove a registration, clearing every trace of `pid`.
    ///
    /// Returns `true` if the pid was registered or active.
    pub fn unregister(&mut self, pid: u32) -> bool {
        let before = self.registered_instances.len();
        self.registered_instances.retain(|i| i.pid != pid);
        let mut changed = before != self.registered_instances.len();

        if self.is_active(pid) {
            self.active_instance = None;
            changed = true;
        }
        if self.pending_import.remove(&pid).is_some() {
            changed = true;
        }
        if self.show_window.as_ref().is_some_and(|s| s.target_pid == pid) {
            self.show_window = None;
        }
        changed
    }

    pub fn is_registered(&self, pid: u32) -> bool {
        self.registered_instances.iter().any(|i| i.pid == pid)
    }

    /// Remove every registrant for which `is_dead` returns `true`.
    ///
    /// Returns the pruned pids in registration order.
    pub fn prune<F>(&mut self, mut is_dead: F) -> Vec<u32>
    where
        F: FnMut(u32) -> bool,
    {
        let dead: Vec<u32> = self
            .registered_instances
            .iter()
            .map(|i| i.pid)
            .filter(|pid| is_dead(*pid))
            .collect();
        for pid in &dead {
            self.unregister(*pid);
        }
        dead
    }

    /// Remove and return the pending batch addressed to `pid`.
    pub fn take_pending(&mut self, pid: u32) -> Option<PendingImport> {
        self.pending_import.remove(&pid)
    }

    /// Age of the record relative to `now`. Future timestamps count as zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_update).max(Duration::zero())
    }

    /// `true` when the record is older than `threshold`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        self.age_at(now)
            .to_std()
            .map(|age| age > threshold)
            .unwrap_or(false)
    }
}
