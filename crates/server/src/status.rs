//! Server status as observed by callers through the status notification.

use serde::Serialize;
use turbo_bridge::BridgeStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Starting,
    Ready,
    Busy,
    Degraded,
    Error,
}

/// Derives the externally visible state from the bridge gauges. A checker
/// pool that is enabled but has no workers means the pool failed to start
/// (or lost every worker): the core still runs, degraded.
pub fn derive_status(status: &BridgeStatus) -> ServerStatus {
    if status.checker_enabled && status.checker_workers == 0 {
        ServerStatus::Degraded
    } else if status.active > 0 {
        ServerStatus::Busy
    } else {
        ServerStatus::Ready
    }
}
