//! Per-process entry point
//!
//! [`Coordinator::initialize`] elects this process hub when no live hub
//! record exists and otherwise joins as a client. The UI layer talks only to
//! the coordinator: claim and release active status, surface the active
//! window, and shut down.

use asset_relay_core::io::StoreError;
use asset_relay_core::{ImportRequest, ShowWindowSignal};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::daemon::Role;
use crate::daemon::client::ClientService;
use crate::daemon::context::ProcessContext;
use crate::daemon::dispatch_task::spawn_dispatch_loop;
use crate::daemon::error::CoordinationError;
use crate::daemon::hub::{HubService, RouteOutcome};
use crate::daemon::socket::{IngestHandle, SocketIngestService};
use crate::daemon::window::activate_best_effort;

/// Election attempts before giving up; a hub can vanish between the liveness
/// check and client registration.
const MAX_ELECTION_ATTEMPTS: u32 = 3;

/// Result of a launch/open action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowWindowOutcome {
    /// Suppressed: a previous request was too recent
    Debounced,
    /// No instance was active; this process claimed it
    Claimed,
    /// This process is already active; its window was raised
    AlreadyActive,
    /// The active instance raised its own window
    Acknowledged { pid: u32 },
    /// The active instance was dead or unresponsive; this process took over
    Reclaimed { from: u32 },
}

enum RoleState {
    Unstarted,
    Hub(HubService),
    Client(ClientService),
    ShutDown,
}

impl RoleState {
    fn role(&self) -> Role {
        match self {
            RoleState::Unstarted => Role::Unstarted,
            RoleState::Hub(_) => Role::Hub,
            RoleState::Client(_) => Role::Client,
            RoleState::ShutDown => Role::ShutDown,
        }
    }
}

/// Suppresses repeated actions inside a fixed window.
#[derive(Debug)]
struct Debounce {
    window: Duration,
    last: Mutex<Option<Instant>>,
}

impl Debounce {
    fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// `true` if the action may run now; records the attempt when it may.
    fn try_fire(&self) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < self.window) {
            return false;
        }
        *last = Some(now);
        true
    }
}

struct DispatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Coordinator {
    ctx: Arc<ProcessContext>,
    state: RoleState,
    ingest: Option<IngestHandle>,
    dispatch: Option<DispatchHandle>,
    debounce: Debounce,
}

impl Coordinator {
    pub fn new(ctx: Arc<ProcessContext>) -> Self {
        let debounce = Debounce::new(ctx.config.coordination.launch_debounce());
        Self {
            ctx,
            state: RoleState::Unstarted,
            ingest: None,
            dispatch: None,
            debounce,
        }
    }

    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.ctx
    }

    pub fn role(&self) -> Role {
        self.state.role()
    }

    /// Address of the ingest listener, if this process owns one
    pub fn ingest_addr(&self) -> Option<SocketAddr> {
        self.ingest
            .as_ref()
            .filter(|h| !h.is_finished())
            .map(IngestHandle::local_addr)
    }

    /// Decide hub or client and start the matching service.
    ///
    /// A hub also binds the ingest port; failing to bind is logged and
    /// tolerated. Both roles start the local dispatch loop.
    pub async fn initialize(&mut self) -> Result<Role, CoordinationError> {
        if !matches!(self.state, RoleState::Unstarted) {
            return Err(CoordinationError::AlreadyInitialized(self.role()));
        }

        let stale_after = self.ctx.config.coordination.stale_after();
        let mut attempt = 0;
        let state = loop {
            attempt += 1;
            let result = if self.ctx.store.is_hub_alive(stale_after) {
                self.start_client()
            } else {
                self.start_hub()
            };

            match result {
                Ok(state) => break state,
                Err(CoordinationError::Store(StoreError::HubTaken { pid })) if attempt < MAX_ELECTION_ATTEMPTS => {
                    info!("Lost hub election to pid {pid}; joining as client");
                }
                Err(CoordinationError::HubUnavailable) if attempt < MAX_ELECTION_ATTEMPTS => {
                    info!("Hub disappeared during registration; electing again");
                }
                Err(e) => return Err(e),
            }
        };

        if let RoleState::Hub(hub) = &state {
            match SocketIngestService::bind(&self.ctx.config.ingest, self.ctx.thumbnails.clone()).await {
                Ok(service) => match service.spawn(hub.router(), CancellationToken::new()) {
                    Ok(handle) => self.ingest = Some(handle),
                    Err(e) => warn!("Ingest listener could not start: {e}"),
                },
                Err(e) => warn!(
                    "Could not bind ingest port {} ({e}); another process owns ingestion",
                    self.ctx.config.ingest.address()
                ),
            }
        }

        let cancel = CancellationToken::new();
        let task = spawn_dispatch_loop(Arc::clone(&self.ctx.queue), Arc::clone(&self.ctx.importer), cancel.clone());
        self.dispatch = Some(DispatchHandle { cancel, task });

        self.state = state;
        info!("Coordinator initialized as {:?}", self.role());
        Ok(self.role())
    }

    fn start_hub(&self) -> Result<RoleState, CoordinationError> {
        let mut hub = HubService::new(Arc::clone(&self.ctx));
        hub.start()?;
        Ok(RoleState::Hub(hub))
    }

    fn start_client(&self) -> Result<RoleState, CoordinationError> {
        let mut client = ClientService::new(Arc::clone(&self.ctx));
        client.start()?;
        Ok(RoleState::Client(client))
    }

    pub fn claim_active(&self) -> Result<(), CoordinationError> {
        match &self.state {
            RoleState::Hub(hub) => hub.claim_active(),
            RoleState::Client(client) => client.claim_active(),
            _ => Err(self.wrong_role("claim_active")),
        }
    }

    pub fn release_active(&self) -> Result<bool, CoordinationError> {
        match &self.state {
            RoleState::Hub(hub) => hub.release_active(),
            RoleState::Client(client) => client.release_active(),
            _ => Err(self.wrong_role("release_active")),
        }
    }

    pub fn is_active(&self) -> bool {
        match &self.state {
            RoleState::Hub(hub) => hub.is_active(),
            RoleState::Client(client) => client.is_active(),
            _ => false,
        }
    }

    /// Hub only: route decoded requests to the active instance.
    pub fn route_import_data(&self, requests: Vec<ImportRequest>) -> Result<RouteOutcome, CoordinationError> {
        match &self.state {
            RoleState::Hub(hub) => hub.route_import_data(requests),
            _ => Err(self.wrong_role("route_import_data")),
        }
    }

    fn wrong_role(&self, operation: &'static str) -> CoordinationError {
        CoordinationError::WrongRole {
            operation,
            role: self.role(),
        }
    }

    /// Launch/open action: surface the active instance's window.
    ///
    /// Another live active instance is asked to raise its own window through
    /// the record. If it does not acknowledge within the configured timeout it
    /// is treated as hung: it is unregistered and this process claims active.
    pub async fn request_show_window(&self) -> Result<ShowWindowOutcome, CoordinationError> {
        if matches!(self.state, RoleState::Unstarted | RoleState::ShutDown) {
            return Err(self.wrong_role("request_show_window"));
        }
        if !self.debounce.try_fire() {
            debug!("Show-window request debounced");
            return Ok(ShowWindowOutcome::Debounced);
        }

        let ctx = &self.ctx;
        let Some(active) = ctx.store.get_active_instance() else {
            self.claim_active()?;
            return Ok(ShowWindowOutcome::Claimed);
        };

        if active.pid == ctx.pid {
            activate_best_effort(ctx.window.as_ref(), ctx.window_handle);
            return Ok(ShowWindowOutcome::AlreadyActive);
        }

        let target = active.pid;
        if ctx.store.probe().is_alive(target) == Some(false) {
            warn!("Active instance {target} is gone; claiming active");
            self.claim_active()?;
            return Ok(ShowWindowOutcome::Reclaimed { from: target });
        }

        let signal = ShowWindowSignal {
            target_pid: target,
            requester_pid: ctx.pid,
            requested_at: Utc::now(),
        };
        if ctx.store.update(|record| record.show_window = Some(signal))?.is_none() {
            return Err(CoordinationError::HubUnavailable);
        }
        debug!("Asked instance {target} to show its window");

        if self.await_show_window_ack(target).await {
            info!("Instance {target} raised its window");
            return Ok(ShowWindowOutcome::Acknowledged { pid: target });
        }

        warn!("Instance {target} did not answer a show-window request; taking over");
        let requester = ctx.pid;
        ctx.store.update(|record| {
            record.unregister(target);
            if record
                .show_window
                .as_ref()
                .is_some_and(|s| s.target_pid == target && s.requester_pid == requester)
            {
                record.show_window = None;
            }
        })?;
        self.claim_active()?;
        Ok(ShowWindowOutcome::Reclaimed { from: target })
    }

    /// Poll until the signal addressed to `target` is gone or the timeout
    /// passes. Returns `true` on acknowledgment.
    async fn await_show_window_ack(&self, target: u32) -> bool {
        let coordination = &self.ctx.config.coordination;
        let step = coordination.show_window_poll();
        let deadline = tokio::time::Instant::now() + coordination.show_window_timeout();

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(step).await;
            let pending = self
                .ctx
                .store
                .read()
                .and_then(|record| record.show_window)
                .is_some_and(|s| s.target_pid == target);
            if !pending {
                return true;
            }
        }
        false
    }

    /// Stop every service this process runs. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(mut ingest) = self.ingest.take() {
            ingest.stop().await;
        }

        if let Some(dispatch) = self.dispatch.take() {
            dispatch.cancel.cancel();
            if let Err(e) = dispatch.task.await {
                error!("Dispatch task panicked: {e}");
            }
        }

        match std::mem::replace(&mut self.state, RoleState::ShutDown) {
            RoleState::Hub(mut hub) => hub.stop().await,
            RoleState::Client(mut client) => client.stop().await,
            RoleState::Unstarted | RoleState::ShutDown => {}
        }
        info!("Coordinator shut down");
    }
}
