//! Per-process single-flight import queue
//!
//! Requests routed to this process are appended here and handed to the
//! [`SceneImporter`] one at a time. The caller drives the queue by calling
//! [`ImportRequestQueue::poll_and_dispatch`] repeatedly, waiting the returned
//! interval between calls.

use crate::config::DispatchConfig;
use crate::schema::ImportRequest;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// The host's scene-import pipeline.
///
/// `import` blocks until the asset is in the scene or has failed.
pub trait SceneImporter: Send + Sync {
    fn import(&self, request: &ImportRequest) -> anyhow::Result<()>;
}

/// FIFO queue guaranteeing at most one import in flight.
#[derive(Debug)]
pub struct ImportRequestQueue {
    pending: Mutex<VecDeque<ImportRequest>>,
    processing: AtomicBool,
    busy_interval: Duration,
    idle_interval: Duration,
}

impl Default for ImportRequestQueue {
    fn default() -> Self {
        Self::new(&DispatchConfig::default())
    }
}

/// Clears the processing flag even if the importer panics.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ImportRequestQueue {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            busy_interval: config.busy_interval(),
            idle_interval: config.idle_interval(),
        }
    }

    pub fn busy_interval(&self) -> Duration {
        self.busy_interval
    }

    pub fn idle_interval(&self) -> Duration {
        self.idle_interval
    }

    /// Append requests in order.
    pub fn enqueue(&self, requests: impl IntoIterator<Item = ImportRequest>) {
        let mut pending = self.lock_pending();
        let before = pending.len();
        pending.extend(requests);
        let added = pending.len() - before;
        if added > 0 {
            info!("Queued {added} import request(s), {} pending", pending.len());
        }
    }

    pub fn len(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_pending().is_empty()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Run at most one queued import and return when to poll next.
    ///
    /// - An import already in flight: returns the busy interval, dequeues nothing.
    /// - Empty queue: returns the idle interval.
    /// - Otherwise pops one request, runs `importer` on it (blocking), and
    ///   returns the busy interval if more remain, else the idle interval.
    ///
    /// Importer errors and panics are logged; the queue moves on.
    pub fn poll_and_dispatch(&self, importer: &dyn SceneImporter) -> Duration {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.busy_interval;
        }
        let _guard = ProcessingGuard(&self.processing);

        let Some(request) = self.lock_pending().pop_front() else {
            return self.idle_interval;
        };

        debug!("Importing {} from {}", request.asset_name, request.asset_path.display());
        match catch_unwind(AssertUnwindSafe(|| importer.import(&request))) {
            Ok(Ok(())) => info!("Imported {}", request.asset_name),
            Ok(Err(e)) => error!("Import of {} failed: {e:#}", request.asset_name),
            Err(_) => error!("Importer panicked while importing {}", request.asset_name),
        }

        if self.is_empty() {
            self.idle_interval
        } else {
            self.busy_interval
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<ImportRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
