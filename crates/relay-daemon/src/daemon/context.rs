//! Per-process coordination context
//!
//! Built once at startup and shared by every service of the process. It owns
//! the process identity (pid, display name, window handle), the store handle,
//! the local import queue and the host collaborators.

use asset_relay_core::config::Config;
use asset_relay_core::heartbeat::HeartbeatWriter;
use asset_relay_core::io::CoordinationStore;
use asset_relay_core::liveness::LivenessProbe;
use asset_relay_core::queue::{ImportRequestQueue, SceneImporter};
use asset_relay_core::thumbnail::ThumbnailFinder;
use asset_relay_core::{InstanceDescriptor, ShowWindowSignal};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::daemon::error::CoordinationError;
use crate::daemon::window::{WindowActivation, activate_best_effort};

/// Everything a coordination service needs to know about its own process
pub struct ProcessContext {
    pub pid: u32,
    pub display_name: String,
    pub window_handle: Option<u64>,
    pub config: Arc<Config>,
    pub store: Arc<CoordinationStore>,
    pub queue: Arc<ImportRequestQueue>,
    pub importer: Arc<dyn SceneImporter>,
    pub window: Arc<dyn WindowActivation>,
    pub thumbnails: ThumbnailFinder,
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("pid", &self.pid)
            .field("display_name", &self.display_name)
            .field("window_handle", &self.window_handle)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Display name used when the host has no document title.
pub fn default_display_name(pid: u32, document_title: Option<&str>) -> String {
    match document_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => title.to_string(),
        None => format!("Unsaved (pid {pid})"),
    }
}

impl ProcessContext {
    /// Build the context for the current process.
    pub fn new(
        config: Config,
        display_name: impl Into<String>,
        probe: Arc<dyn LivenessProbe>,
        importer: Arc<dyn SceneImporter>,
        window: Arc<dyn WindowActivation>,
    ) -> Self {
        let store = CoordinationStore::new(config.record_path(), probe)
            .with_stale_after(config.coordination.stale_after())
            .with_lock_timeout(config.coordination.lock_timeout());
        let queue = ImportRequestQueue::new(&config.dispatch);

        Self {
            pid: std::process::id(),
            display_name: display_name.into(),
            window_handle: None,
            config: Arc::new(config),
            store: Arc::new(store),
            queue: Arc::new(queue),
            importer,
            window,
            thumbnails: ThumbnailFinder::new(),
        }
    }

    /// Override the pid. Lets one test process stand in for several instances.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_window_handle(mut self, window_handle: Option<u64>) -> Self {
        self.window_handle = window_handle;
        self
    }

    /// This process as an active-instance candidate
    pub fn descriptor(&self) -> InstanceDescriptor {
        InstanceDescriptor {
            pid: self.pid,
            display_name: self.display_name.clone(),
            window_handle: self.window_handle,
        }
    }

    pub fn heartbeat_writer(&self) -> HeartbeatWriter {
        HeartbeatWriter::new(
            self.config.heartbeat_dir(),
            self.pid,
            self.config.heartbeat.interval(),
            self.config.heartbeat.max_age(),
        )
    }

    /// Mark this process active and raise its window.
    ///
    /// Fails with [`CoordinationError::HubUnavailable`] when there is no record
    /// to write into.
    pub fn claim_active(&self) -> Result<(), CoordinationError> {
        let descriptor = self.descriptor();
        let now = Utc::now();
        let (pid, name) = (self.pid, self.display_name.clone());
        let updated = self.store.update(move |record| {
            record.register(pid, &name, now);
            record.active_instance = Some(descriptor);
        })?;
        if updated.is_none() {
            return Err(CoordinationError::HubUnavailable);
        }

        info!("Instance {} ({}) is now active", self.pid, self.display_name);
        activate_best_effort(self.window.as_ref(), self.window_handle);
        Ok(())
    }

    /// Clear the active instance if it is this process.
    ///
    /// Returns `false` when this process was not active.
    pub fn release_active(&self) -> Result<bool, CoordinationError> {
        let pid = self.pid;
        let released = self.store.update(move |record| {
            if record.is_active(pid) {
                record.active_instance = None;
                true
            } else {
                false
            }
        })?;
        let released = released.unwrap_or(false);
        if released {
            info!("Instance {} released active status", self.pid);
        }
        Ok(released)
    }

    /// If a show-window signal targets this process, clear it and raise the
    /// window. Returns `true` when a signal was served.
    pub fn answer_show_window(&self) -> Result<bool, CoordinationError> {
        let pid = self.pid;
        let taken = self.store.update(move |record| {
            match record.show_window.take() {
                Some(signal) if signal.target_pid == pid => Some(signal),
                other => {
                    record.show_window = other;
                    None
                }
            }
        })?;

        match taken.flatten() {
            Some(ShowWindowSignal { requester_pid, .. }) => {
                debug!("Serving show-window request from pid {requester_pid}");
                activate_best_effort(self.window.as_ref(), self.window_handle);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_display_name() {
        assert_eq!(default_display_name(42, None), "Unsaved (pid 42)");
        assert_eq!(default_display_name(42, Some("  ")), "Unsaved (pid 42)");
        assert_eq!(default_display_name(42, Some("forest.scene")), "forest.scene");
    }
}
