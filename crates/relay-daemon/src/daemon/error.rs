//! Error types for coordination services

use asset_relay_core::io::StoreError;
use thiserror::Error;

use crate::daemon::Role;

/// Errors surfaced by the hub, client and coordinator
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// The coordination store could not be written
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No live hub record exists (or it vanished mid-handshake)
    #[error("No live hub is available")]
    HubUnavailable,

    /// The operation needs a role this process does not hold
    #[error("{operation} is not available in role {role:?}")]
    WrongRole { operation: &'static str, role: Role },

    /// `initialize` was called twice
    #[error("Coordinator already initialized as {0:?}")]
    AlreadyInitialized(Role),

    /// A service was started twice
    #[error("Service already started")]
    AlreadyStarted,
}
