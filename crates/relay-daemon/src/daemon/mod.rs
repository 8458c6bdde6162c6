//! Coordination services
//!
//! - [`HubService`]: elected coordinator, heartbeat and import routing
//! - [`ClientService`]: polls the shared record for routed work
//! - [`SocketIngestService`]: TCP listener owned by the hub
//! - [`Coordinator`]: per-process election and lifecycle

pub mod client;
pub mod context;
pub mod coordinator;
pub mod dispatch_task;
pub mod error;
pub mod hub;
pub mod socket;
pub mod window;

pub use client::{ClientService, PollReport};
pub use context::{ProcessContext, default_display_name};
pub use coordinator::{Coordinator, ShowWindowOutcome};
pub use dispatch_task::spawn_dispatch_loop;
pub use error::CoordinationError;
pub use hub::{HeartbeatReport, HubService, HubView, ImportRouter, RouteOutcome};
pub use socket::{IngestHandle, SocketIngestService};
pub use window::{LogOnlyWindow, WindowActivation};

/// Coordination role of this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `initialize` has not run yet
    Unstarted,
    Hub,
    Client,
    /// `shutdown` has run
    ShutDown,
}
