//! Channel and connection status values.

use serde::{Deserialize, Serialize};

/// Lifecycle status shared by channels and device connections.
///
/// Transitions are monotonic toward the terminal states [`LinkStatus::Failed`]
/// and [`LinkStatus::Closed`]; a terminal link is never resurrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Constructed, nothing attempted yet.
    Idle,
    /// Attempting to open, or awaiting device identification.
    Waiting,
    /// Byte pipe open, or device identified.
    Connected,
    /// Transport error or validation timeout. Terminal.
    Failed,
    /// Orderly shutdown or inactivity expiry. Terminal.
    Closed,
}

impl LinkStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkStatus::Failed | LinkStatus::Closed)
    }
}
