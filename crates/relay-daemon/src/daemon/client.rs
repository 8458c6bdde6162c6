//! Client service: a non-hub instance
//!
//! A client only talks to the hub through the coordination record. Every
//! poll it refreshes its view of who is active, re-registers if the hub lost
//! track of it, serves show-window requests and consumes any import batch
//! routed to it.

use asset_relay_core::heartbeat::HeartbeatWriter;
use asset_relay_core::PendingImport;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::daemon::context::ProcessContext;
use crate::daemon::error::CoordinationError;

/// Result of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// No record existed; nothing else was attempted
    pub record_missing: bool,
    /// The record no longer listed this process and it registered again
    pub reregistered: bool,
    /// Requests consumed from the record and enqueued locally
    pub enqueued: usize,
    /// Requests consumed but dropped because they outlived the TTL
    pub expired: usize,
    pub served_show_window: bool,
}

struct ClientInner {
    ctx: Arc<ProcessContext>,
    active: AtomicBool,
    heartbeat_file: Mutex<HeartbeatWriter>,
}

pub struct ClientService {
    inner: Arc<ClientInner>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ClientService {
    pub fn new(ctx: Arc<ProcessContext>) -> Self {
        let heartbeat_file = ctx.heartbeat_writer();
        Self {
            inner: Arc::new(ClientInner {
                ctx,
                active: AtomicBool::new(false),
                heartbeat_file: Mutex::new(heartbeat_file),
            }),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Register with the live hub and start polling.
    ///
    /// Fails with [`CoordinationError::HubUnavailable`] if no live hub record
    /// exists, or if the record disappeared before registration landed.
    pub fn start(&mut self) -> Result<(), CoordinationError> {
        if self.task.is_some() {
            return Err(CoordinationError::AlreadyStarted);
        }

        let ctx = &self.inner.ctx;
        let coordination = &ctx.config.coordination;
        if !ctx.store.is_hub_alive(coordination.stale_after()) {
            return Err(CoordinationError::HubUnavailable);
        }
        if !ctx.store.register_instance(ctx.pid, &ctx.display_name)? {
            return Err(CoordinationError::HubUnavailable);
        }
        info!("Registered as client (pid {})", ctx.pid);

        self.inner.poll()?;

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            poll_loop(inner, cancel).await;
        }));
        Ok(())
    }

    /// Run one poll cycle now.
    pub fn poll(&self) -> Result<PollReport, CoordinationError> {
        self.inner.poll()
    }

    /// Active flag as of the last poll or claim
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn claim_active(&self) -> Result<(), CoordinationError> {
        self.inner.ctx.claim_active()?;
        self.inner.active.store(true, Ordering::Release);
        Ok(())
    }

    /// Release active status. A no-op returning `false` unless this client
    /// currently believes it is active.
    pub fn release_active(&self) -> Result<bool, CoordinationError> {
        if !self.is_active() {
            return Ok(false);
        }
        let released = self.inner.ctx.release_active()?;
        self.inner.active.store(false, Ordering::Release);
        Ok(released)
    }

    /// Stop polling and remove this process from the record.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Client poll task panicked: {e}");
            }
        }

        let ctx = &self.inner.ctx;
        match ctx.store.unregister_instance(ctx.pid) {
            Ok(true) => info!("Unregistered client {}", ctx.pid),
            Ok(false) => debug!("Client {} was not registered", ctx.pid),
            Err(e) => error!("Failed to unregister client {}: {e}", ctx.pid),
        }
        self.inner.active.store(false, Ordering::Release);
        self.inner.lock_heartbeat_file().remove();
    }
}

async fn poll_loop(inner: Arc<ClientInner>, cancel: CancellationToken) {
    let period = inner.ctx.config.coordination.poll_interval();
    debug!("Starting client poll (interval: {:?})", period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = inner.poll() {
                    warn!("Client poll failed: {e}");
                }
            }
            _ = cancel.cancelled() => {
                debug!("Client poll cancelled");
                break;
            }
        }
    }
}

impl ClientInner {
    fn lock_heartbeat_file(&self) -> std::sync::MutexGuard<'_, HeartbeatWriter> {
        self.heartbeat_file.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn poll(&self) -> Result<PollReport, CoordinationError> {
        let ctx = &self.ctx;
        let pid = ctx.pid;
        let name = ctx.display_name.clone();
        let now = Utc::now();
        let mut report = PollReport::default();

        let outcome = ctx.store.update(move |record| {
            let reregistered = !record.is_registered(pid);
            if reregistered {
                record.register(pid, &name, now);
            }
            (reregistered, record.is_active(pid), record.take_pending(pid))
        })?;

        let Some((reregistered, is_active, pending)) = outcome else {
            report.record_missing = true;
            return Ok(report);
        };

        if reregistered {
            info!("Client {pid} was missing from the record; registered again");
        }
        report.reregistered = reregistered;
        self.active.store(is_active, Ordering::Release);

        if let Some(pending) = pending {
            self.accept_pending(pending, &mut report);
        }

        report.served_show_window = ctx.answer_show_window()?;

        if is_active {
            if let Err(e) = self.lock_heartbeat_file().beat() {
                warn!("Failed to write heartbeat file: {e}");
            }
        }
        Ok(report)
    }

    fn accept_pending(&self, pending: PendingImport, report: &mut PollReport) {
        let ttl = self.ctx.config.coordination.pending_import_ttl();
        let (fresh, expired) = pending.into_fresh(Utc::now(), ttl);

        if expired > 0 {
            warn!("Dropping {expired} routed import request(s) older than {ttl:?}");
        }
        report.expired = expired;

        if fresh.is_empty() {
            return;
        }
        debug!("Received {} routed import request(s)", fresh.len());
        report.enqueued = fresh.len();
        self.ctx.queue.enqueue(fresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::window::LogOnlyWindow;
    use asset_relay_core::config::Config;
    use asset_relay_core::io::CoordinationStore;
    use asset_relay_core::liveness::FixedProbe;
    use asset_relay_core::queue::SceneImporter;
    use asset_relay_core::{ImportRequest, InstanceDescriptor, ShowWindowSignal};
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct NullImporter;

    impl SceneImporter for NullImporter {
        fn import(&self, _request: &ImportRequest) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn context(dir: &TempDir, pid: u32) -> Arc<ProcessContext> {
        let mut config = Config::default();
        config.coordination.record_path = Some(dir.path().join("coordination.json"));
        config.heartbeat.dir = Some(dir.path().join("heartbeats"));
        Arc::new(
            ProcessContext::new(
                config,
                format!("Scene {pid}"),
                Arc::new(FixedProbe::new()),
                Arc::new(NullImporter),
                Arc::new(LogOnlyWindow),
            )
            .with_pid(pid),
        )
    }

    fn hub_store(dir: &TempDir) -> CoordinationStore {
        let store = CoordinationStore::new(dir.path().join("coordination.json"), Arc::new(FixedProbe::new()));
        store.register_hub(1).unwrap();
        store
    }

    fn request(name: &str) -> ImportRequest {
        ImportRequest {
            asset_path: PathBuf::from(format!("/assets/{name}")),
            asset_name: name.to_string(),
            thumbnail_path: None,
            texture_resolution: None,
        }
    }

    #[tokio::test]
    async fn test_start_without_hub_fails() {
        let dir = TempDir::new().unwrap();
        let mut client = ClientService::new(context(&dir, 200));
        assert!(matches!(client.start(), Err(CoordinationError::HubUnavailable)));
    }

    #[tokio::test]
    async fn test_start_registers_and_stop_unregisters() {
        let dir = TempDir::new().unwrap();
        let store = hub_store(&dir);
        let mut client = ClientService::new(context(&dir, 200));

        client.start().unwrap();
        assert!(store.read().unwrap().is_registered(200));

        client.stop().await;
        assert!(!store.read().unwrap().is_registered(200));
    }

    #[tokio::test]
    async fn test_poll_reregisters_when_missing() {
        let dir = TempDir::new().unwrap();
        let store = hub_store(&dir);
        let mut client = ClientService::new(context(&dir, 200));
        client.start().unwrap();

        store.unregister_instance(200).unwrap();
        let report = client.poll().unwrap();
        assert!(report.reregistered);
        assert!(store.read().unwrap().is_registered(200));

        client.stop().await;
    }

    #[tokio::test]
    async fn test_poll_consumes_pending_batch() {
        let dir = TempDir::new().unwrap();
        let store = hub_store(&dir);
        let ctx = context(&dir, 200);
        let mut client = ClientService::new(Arc::clone(&ctx));
        client.start().unwrap();

        store
            .update(|record| {
                record
                    .pending_import
                    .insert(200, PendingImport::new(vec![request("a"), request("b")], Utc::now()))
            })
            .unwrap();

        let report = client.poll().unwrap();
        assert_eq!(report.enqueued, 2);
        assert_eq!(ctx.queue.len(), 2);
        assert!(store.read().unwrap().pending_import.is_empty());

        let again = client.poll().unwrap();
        assert_eq!(again.enqueued, 0);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_poll_drops_expired_batch() {
        let dir = TempDir::new().unwrap();
        let store = hub_store(&dir);
        let ctx = context(&dir, 200);
        let mut client = ClientService::new(Arc::clone(&ctx));
        client.start().unwrap();

        store
            .update(|record| {
                record.pending_import.insert(
                    200,
                    PendingImport::new(vec![request("old")], Utc::now() - chrono::Duration::seconds(31)),
                )
            })
            .unwrap();

        let report = client.poll().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.enqueued, 0);
        assert!(ctx.queue.is_empty());
        assert!(store.read().unwrap().pending_import.is_empty());

        client.stop().await;
    }

    #[tokio::test]
    async fn test_poll_tracks_active_flag_and_release() {
        let dir = TempDir::new().unwrap();
        let store = hub_store(&dir);
        let mut client = ClientService::new(context(&dir, 200));
        client.start().unwrap();
        assert!(!client.is_active());
        assert!(!client.release_active().unwrap());

        store
            .set_active_instance(Some(InstanceDescriptor {
                pid: 200,
                display_name: "Scene 200".to_string(),
                window_handle: None,
            }))
            .unwrap();
        client.poll().unwrap();
        assert!(client.is_active());

        assert!(client.release_active().unwrap());
        assert!(!client.is_active());
        assert!(store.read().unwrap().active_instance.is_none());

        client.claim_active().unwrap();
        assert!(client.is_active());
        assert_eq!(store.read().unwrap().active_pid(), Some(200));

        client.stop().await;
        assert!(store.read().unwrap().active_instance.is_none());
    }

    #[tokio::test]
    async fn test_poll_serves_show_window_signal() {
        let dir = TempDir::new().unwrap();
        let store = hub_store(&dir);
        let mut client = ClientService::new(context(&dir, 200));
        client.start().unwrap();

        store
            .update(|record| {
                record.show_window = Some(ShowWindowSignal {
                    target_pid: 200,
                    requester_pid: 300,
                    requested_at: Utc::now(),
                })
            })
            .unwrap();

        assert!(client.poll().unwrap().served_show_window);
        assert!(store.read().unwrap().show_window.is_none());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_poll_without_record_reports_missing() {
        let dir = TempDir::new().unwrap();
        let store = hub_store(&dir);
        let mut client = ClientService::new(context(&dir, 200));
        client.start().unwrap();

        store.cleanup().unwrap();
        assert!(client.poll().unwrap().record_missing);
        assert!(store.read().is_none());
        client.stop().await;
    }
}
