//! Core types and storage for asset-relay
//!
//! This crate provides the building blocks shared by every cooperating
//! process of the host application:
//!
//! - The file-persisted [`CoordinationRecord`] and its [`io::CoordinationStore`]
//! - Process liveness probing used for stale-record reclamation
//! - Decoding of externally pushed import payloads into [`ImportRequest`]s
//! - The per-process single-flight [`queue::ImportRequestQueue`]
//!
//! All schema types tolerate missing optional fields so that records written
//! by older builds still load.

pub mod config;
pub mod heartbeat;
pub mod home;
pub mod io;
pub mod liveness;
pub mod logging;
pub mod payload;
pub mod queue;
pub mod schema;
pub mod thumbnail;

pub use schema::{
    CoordinationRecord, ImportRequest, InstanceDescriptor, PendingImport, QueuedRequest,
    RegisteredInstance, ShowWindowSignal,
};
