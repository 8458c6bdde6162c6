//! Cross-process coordination services for asset-relay
//!
//! One process per machine is elected hub; every other process of the host
//! application runs as a client. The hub owns the ingest socket and routes
//! incoming import requests to whichever instance the user marked active.
//! See [`daemon::Coordinator`] for the per-process entry point.

pub mod daemon;
