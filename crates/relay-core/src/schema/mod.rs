//! Schema types for the shared coordination record
//!
//! These structures are persisted as JSON in the coordination file. Optional
//! and collection fields default when absent so that records written by older
//! builds continue to load.

mod coordination_record;
mod import_request;

pub use coordination_record::{
    CoordinationRecord, InstanceDescriptor, PendingImport, QueuedRequest, RegisteredInstance,
    ShowWindowSignal,
};
pub use import_request::ImportRequest;
