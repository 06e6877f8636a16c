//! CoordinatorHandle - client interface for a running Coordinator

use std::sync::Arc;

use eyre::{Result, eyre};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::config::{DependencyKey, validate_key};
use super::error::CoordinatorError;
use super::messages::{CoordRequest, CoordinatorMetrics};
use super::state::{FetchPhase, FetchState};

/// Handle for talking to a Coordinator
///
/// Cheap to clone; all clones address the same Coordinator. Dropping the last
/// handle disposes it.
pub struct CoordinatorHandle<T> {
    id: String,
    tx: mpsc::UnboundedSender<CoordRequest>,
    state: Arc<watch::Sender<FetchState<T>>>,
}

impl<T> Clone for CoordinatorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> CoordinatorHandle<T> {
    pub(crate) fn new(id: String, tx: mpsc::UnboundedSender<CoordRequest>, state: Arc<watch::Sender<FetchState<T>>>) -> Self {
        Self { id, tx, state }
    }

    /// Unique id of this Coordinator, used in log lines
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the current state
    pub fn read(&self) -> FetchState<T>
    where
        T: Clone,
    {
        self.state.borrow().clone()
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.state.subscribe()
    }

    /// Fetch now, regardless of enabled flags; the timer is left alone
    pub fn trigger(&self) {
        debug!(id = %self.id, "CoordinatorHandle::trigger: called");
        self.send(CoordRequest::Trigger);
    }

    /// Pause or resume automatic polling for this instance
    pub fn set_enabled(&self, enabled: bool) {
        debug!(id = %self.id, enabled, "CoordinatorHandle::set_enabled: called");
        self.send(CoordRequest::SetEnabled { enabled });
    }

    /// Report the owning component's current inputs
    ///
    /// A key equal to the previous one is ignored; a different key forces an
    /// immediate fetch and restarts the timer.
    pub fn notify_dependencies_changed(&self, key: DependencyKey) -> Result<(), CoordinatorError> {
        debug!(id = %self.id, ?key, "CoordinatorHandle::notify_dependencies_changed: called");
        validate_key(&key)?;
        self.send(CoordRequest::DependenciesChanged { key });
        Ok(())
    }

    /// Stop the Coordinator
    ///
    /// Once this returns no further state change is published, even for
    /// fetches still in flight. Idempotent.
    pub fn dispose(&self) {
        debug!(id = %self.id, "CoordinatorHandle::dispose: called");
        mark_disposed(&self.state);
        self.send(CoordRequest::Dispose);
    }

    pub fn is_disposed(&self) -> bool {
        self.state.borrow().is_disposed()
    }

    /// Get current metrics
    pub async fn metrics(&self) -> Result<CoordinatorMetrics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(CoordRequest::GetMetrics { reply_tx })
            .map_err(|_| eyre!("Coordinator {} has stopped", self.id))?;
        reply_rx
            .await
            .map_err(|_| eyre!("Coordinator {} dropped the metrics request", self.id))
    }

    fn send(&self, req: CoordRequest) {
        if self.tx.send(req).is_err() {
            debug!(id = %self.id, "Coordinator already stopped, request ignored");
        }
    }
}

/// Move the state to Disposed; later writes through `send_if_modified` see it and skip
pub(crate) fn mark_disposed<T>(state: &watch::Sender<FetchState<T>>) {
    state.send_if_modified(|s| {
        if s.is_disposed() {
            return false;
        }
        s.phase = FetchPhase::Disposed;
        true
    });
}
