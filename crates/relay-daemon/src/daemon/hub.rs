//! Hub service: the single elected coordinator
//!
//! The hub writes the coordination record at startup, then runs a heartbeat
//! every second that:
//!
//! 1. Re-reads the record, picking up changes clients made directly
//! 2. Stamps `last_update` so other processes see the hub is alive
//! 3. Prunes registrants whose process is gone, clearing `active_instance`
//!    when it pointed at one of them
//!
//! Dead active instances are not replaced automatically; a user has to claim
//! active status again.

use asset_relay_core::heartbeat::HeartbeatWriter;
use asset_relay_core::{
    CoordinationRecord, ImportRequest, InstanceDescriptor, PendingImport, RegisteredInstance,
};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::daemon::context::ProcessContext;
use crate::daemon::error::CoordinationError;

/// Where a batch of import requests ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Nothing to route
    Empty,
    /// Enqueued on this process's own queue
    Local { count: usize },
    /// Written to the record for another instance to pick up
    Forwarded { pid: u32, count: usize },
}

/// Accepts decoded import requests. Implemented by the hub.
pub trait ImportRouter: Send + Sync {
    fn route_import_data(&self, requests: Vec<ImportRequest>) -> Result<RouteOutcome, CoordinationError>;
}

/// The hub's in-memory mirror of the record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubView {
    pub active_instance: Option<InstanceDescriptor>,
    pub registered_instances: Vec<RegisteredInstance>,
}

/// Result of one heartbeat cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Pids removed because their process is gone
    pub pruned: Vec<u32>,
    /// The active instance was among the pruned
    pub cleared_active: bool,
    /// Another process rewrote the record as hub
    pub superseded_by: Option<u32>,
    /// A show-window request for this process was served
    pub served_show_window: bool,
}

struct HubInner {
    ctx: Arc<ProcessContext>,
    view: Mutex<HubView>,
    heartbeat_file: Mutex<HeartbeatWriter>,
}

/// Elected coordinator for the lifetime of this process
pub struct HubService {
    inner: Arc<HubInner>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HubService {
    pub fn new(ctx: Arc<ProcessContext>) -> Self {
        let heartbeat_file = ctx.heartbeat_writer();
        Self {
            inner: Arc::new(HubInner {
                ctx,
                view: Mutex::new(HubView::default()),
                heartbeat_file: Mutex::new(heartbeat_file),
            }),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Write a fresh hub record and start the heartbeat loop.
    ///
    /// Must be called from within a tokio runtime. Fails if the record cannot
    /// be written or another live hub won the election in the meantime
    /// ([`StoreError::HubTaken`](asset_relay_core::io::StoreError::HubTaken)).
    pub fn start(&mut self) -> Result<(), CoordinationError> {
        if self.task.is_some() {
            return Err(CoordinationError::AlreadyStarted);
        }

        let ctx = &self.inner.ctx;
        ctx.store.register_hub(ctx.pid)?;
        ctx.store.register_instance(ctx.pid, &ctx.display_name)?;
        info!("Registered as hub (pid {}) at {}", ctx.pid, ctx.store.path().display());

        self.inner.heartbeat()?;

        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            heartbeat_loop(inner, cancel).await;
        }));
        Ok(())
    }

    /// Run one heartbeat cycle now.
    pub fn heartbeat(&self) -> Result<HeartbeatReport, CoordinationError> {
        self.inner.heartbeat()
    }

    pub fn view(&self) -> HubView {
        self.inner.lock_view().clone()
    }

    /// `true` if the hub's mirror says this process is active
    pub fn is_active(&self) -> bool {
        self.inner
            .lock_view()
            .active_instance
            .as_ref()
            .is_some_and(|a| a.pid == self.inner.ctx.pid)
    }

    pub fn claim_active(&self) -> Result<(), CoordinationError> {
        self.inner.ctx.claim_active()?;
        self.inner.lock_view().active_instance = Some(self.inner.ctx.descriptor());
        Ok(())
    }

    pub fn release_active(&self) -> Result<bool, CoordinationError> {
        let released = self.inner.ctx.release_active()?;
        if released {
            self.inner.lock_view().active_instance = None;
        }
        Ok(released)
    }

    pub fn route_import_data(&self, requests: Vec<ImportRequest>) -> Result<RouteOutcome, CoordinationError> {
        self.inner.route_import_data(requests)
    }

    /// Router handle for the socket ingest service
    pub fn router(&self) -> Arc<dyn ImportRouter> {
        self.inner.clone()
    }

    /// Stop the heartbeat loop and delete the record if it is still ours.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Hub heartbeat task panicked: {e}");
            }
        }

        let ctx = &self.inner.ctx;
        match ctx.store.release_hub(ctx.pid) {
            Ok(true) => info!("Hub record removed"),
            Ok(false) => debug!("Hub record not removed (absent or superseded)"),
            Err(e) => error!("Failed to remove hub record: {e}"),
        }
        self.inner.lock_heartbeat_file().remove();
    }
}

async fn heartbeat_loop(inner: Arc<HubInner>, cancel: CancellationToken) {
    let period = inner.ctx.config.coordination.heartbeat_interval();
    info!("Starting hub heartbeat (interval: {:?})", period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match inner.heartbeat() {
                    Ok(report) => {
                        if !report.pruned.is_empty() {
                            info!("Pruned dead instance(s): {:?}", report.pruned);
                        }
                        if report.cleared_active {
                            warn!("Active instance died; no instance is active until one is claimed");
                        }
                    }
                    Err(e) => error!("Hub heartbeat failed: {e}"),
                }
            }
            _ = cancel.cancelled() => {
                info!("Hub heartbeat cancelled");
                break;
            }
        }
    }
}

impl HubInner {
    fn lock_view(&self) -> std::sync::MutexGuard<'_, HubView> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_heartbeat_file(&self) -> std::sync::MutexGuard<'_, HeartbeatWriter> {
        self.heartbeat_file.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn heartbeat(&self) -> Result<HeartbeatReport, CoordinationError> {
        let ctx = &self.ctx;
        let pid = ctx.pid;
        let name = ctx.display_name.clone();
        let probe = Arc::clone(ctx.store.probe());
        let now = Utc::now();

        let (mut report, record) = ctx.store.update_or_insert(
            || {
                warn!("Coordination record missing; rewriting as hub");
                CoordinationRecord::new_for_hub(pid, now)
            },
            move |record| {
                let mut report = HeartbeatReport::default();
                if record.hub_pid != pid {
                    report.superseded_by = Some(record.hub_pid);
                    return (report, record.clone());
                }

                record.last_update = now;
                record.register(pid, &name, now);

                let is_dead = |candidate: u32| candidate != pid && probe.is_alive(candidate) == Some(false);
                let had_active = record.active_pid();
                report.pruned = record.prune(&is_dead);

                if let Some(active) = record.active_pid() {
                    if is_dead(active) {
                        record.active_instance = None;
                    }
                }
                report.cleared_active = had_active.is_some() && record.active_instance.is_none();
                (report, record.clone())
            },
        )?;

        if let Some(other) = report.superseded_by {
            warn!("Hub role now held by pid {other}; this process no longer owns the record");
        }

        {
            let mut view = self.lock_view();
            view.active_instance = record.active_instance.clone();
            view.registered_instances = record.registered_instances.clone();
        }

        report.served_show_window = ctx.answer_show_window()?;

        if record.is_active(pid) {
            if let Err(e) = self.lock_heartbeat_file().beat() {
                warn!("Failed to write heartbeat file: {e}");
            }
        }
        Ok(report)
    }

    /// Append `requests` to the target's pending batch. Returns `None` when
    /// they were imported on the hub instead: the target stopped being active,
    /// or the record could not be written.
    fn forward(&self, target: u32, requests: Vec<ImportRequest>) -> Option<usize> {
        let now = Utc::now();
        let count = requests.len();
        let forwarded = self.ctx.store.update(|record| {
            if !record.is_active(target) {
                return false;
            }
            let appended = requests.clone();
            match record.pending_import.get_mut(&target) {
                Some(pending) => pending.append(appended, now),
                None => {
                    record.pending_import.insert(target, PendingImport::new(appended, now));
                }
            }
            true
        });

        match forwarded {
            Ok(Some(true)) => return Some(count),
            Ok(_) => debug!("Target {target} not reachable through the record; importing locally"),
            Err(e) => warn!("Could not hand {count} import request(s) to pid {target} ({e}); importing locally"),
        }
        self.enqueue_local(requests);
        None
    }

    fn enqueue_local(&self, requests: Vec<ImportRequest>) -> usize {
        let count = requests.len();
        self.ctx.queue.enqueue(requests);
        count
    }
}

impl ImportRouter for HubInner {
    fn route_import_data(&self, requests: Vec<ImportRequest>) -> Result<RouteOutcome, CoordinationError> {
        if requests.is_empty() {
            return Ok(RouteOutcome::Empty);
        }
        let ctx = &self.ctx;

        let active = ctx
            .store
            .get_active_instance()
            .or_else(|| self.lock_view().active_instance.clone());

        let target = match active {
            None => None,
            Some(a) if a.pid == ctx.pid => None,
            Some(a) if ctx.store.probe().is_alive(a.pid) == Some(false) => {
                warn!("Active instance {} is gone; importing on the hub", a.pid);
                None
            }
            Some(a) => Some(a.pid),
        };

        let Some(target) = target else {
            let count = self.enqueue_local(requests);
            return Ok(RouteOutcome::Local { count });
        };

        let count = requests.len();
        match self.forward(target, requests) {
            Some(count) => {
                info!("Forwarded {count} import request(s) to pid {target}");
                Ok(RouteOutcome::Forwarded { pid: target, count })
            }
            None => Ok(RouteOutcome::Local { count }),
        }
    }
}
