//! Error types for coordination store operations

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while writing the coordination record
///
/// Reads never surface these: a missing or corrupt record reads as `None`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store lock stayed held for the whole wait
    #[error("Failed to acquire lock on {path} within {waited:?}")]
    LockTimeout { path: PathBuf, waited: Duration },

    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize the record
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Compare-and-swap write found the record changed since it was read
    #[error("Coordination record at {path} changed since it was read")]
    Conflict { path: PathBuf },

    /// Another live process already holds the hub role
    #[error("Hub role already held by live process {pid}")]
    HubTaken { pid: u32 },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
