//! Message types for the Coordinator

use serde::Serialize;
use tokio::sync::oneshot;

use super::config::DependencyKey;
use super::error::CoordinatorError;

/// Requests sent from a handle to the Coordinator task
#[derive(Debug)]
pub enum CoordRequest {
    /// Fetch now, outside the timer schedule
    Trigger,

    /// Enable or pause automatic polling for this instance
    SetEnabled { enabled: bool },

    /// The owning component's inputs changed
    DependenciesChanged { key: DependencyKey },

    /// Get current metrics
    GetMetrics {
        reply_tx: oneshot::Sender<CoordinatorMetrics>,
    },

    /// Tear the Coordinator down
    Dispose,
}

/// What started a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// First fetch on construction
    Initial,
    /// Timer tick
    Scheduled,
    /// Dependency key change
    Dependency,
    /// Explicit `trigger()` call
    Manual,
}

/// Result of one producer call, sent back to the Coordinator task
#[derive(Debug)]
pub(crate) struct FetchOutcome<T> {
    pub fetch_id: u64,
    pub kind: TriggerKind,
    pub result: Result<T, CoordinatorError>,
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorMetrics {
    pub fetches_started: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    pub ticks_coalesced: u64,
    pub results_discarded: u64,
    pub in_flight: usize,
}
