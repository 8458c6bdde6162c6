//! Window activation collaborator

use tracing::{info, warn};

/// Brings a native window to the foreground.
///
/// Implementations are best-effort; callers log failures and carry on.
pub trait WindowActivation: Send + Sync {
    fn bring_to_foreground(&self, window_handle: Option<u64>) -> anyhow::Result<()>;
}

/// Activation for headless hosts: only logs the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyWindow;

impl WindowActivation for LogOnlyWindow {
    fn bring_to_foreground(&self, window_handle: Option<u64>) -> anyhow::Result<()> {
        info!("Foreground requested for window {window_handle:?}");
        Ok(())
    }
}

/// Request activation, logging instead of propagating failure.
pub fn activate_best_effort(window: &dyn WindowActivation, window_handle: Option<u64>) {
    if let Err(e) = window.bring_to_foreground(window_handle) {
        warn!("Failed to bring window {window_handle:?} to foreground: {e:#}");
    }
}
