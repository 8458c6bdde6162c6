//! Background driver for the local import queue

use asset_relay_core::queue::{ImportRequestQueue, SceneImporter};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Drive `queue` until cancelled.
///
/// Each cycle runs [`ImportRequestQueue::poll_and_dispatch`] on the blocking
/// pool, then sleeps for the interval it returned. An import in progress is
/// allowed to finish before the loop observes cancellation.
pub fn spawn_dispatch_loop(
    queue: Arc<ImportRequestQueue>,
    importer: Arc<dyn SceneImporter>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting import dispatch loop");
        loop {
            let cycle_queue = Arc::clone(&queue);
            let cycle_importer = Arc::clone(&importer);
            let next = match tokio::task::spawn_blocking(move || {
                cycle_queue.poll_and_dispatch(cycle_importer.as_ref())
            })
            .await
            {
                Ok(next) => next,
                Err(e) => {
                    error!("Dispatch cycle failed: {e}");
                    queue.idle_interval()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(next) => {}
                _ = cancel.cancelled() => {
                    info!("Import dispatch loop cancelled");
                    break;
                }
            }
        }
    })
}
