//! Cross-process file I/O for the coordination record
//!
//! Key features:
//!
//! - **Atomic replace**: write-to-temporary-then-rename, so readers never see a
//!   partially written record
//! - **File locking**: advisory locks with exponential backoff retry serialize
//!   every read-modify-write across processes
//! - **Compare-and-swap**: BLAKE3 content versions let a caller write only if
//!   the record is unchanged since its read
//!
//! # Example
//!
//! ```rust,no_run
//! use asset_relay_core::io::CoordinationStore;
//! use asset_relay_core::liveness::OsProcessProbe;
//! use std::sync::Arc;
//!
//! let store = CoordinationStore::new("/tmp/asset-relay/coordination.json", Arc::new(OsProcessProbe));
//! store.register_hub(std::process::id()).unwrap();
//! store.register_instance(std::process::id(), "Unsaved").unwrap();
//! ```

pub mod atomic;
pub mod error;
pub mod hash;
pub mod lock;
pub mod store;

// Re-export primary API
pub use error::StoreError;
pub use hash::RecordVersion;
pub use store::{CoordinationStore, DEFAULT_STALE_AFTER};
