//! Application visibility signal

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Whether the application is currently in front of the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

/// Notifier for foreground/background transitions
///
/// Cheap to clone; every clone feeds the same signal. Subscribers only see
/// actual transitions, so setting the current value again is a no-op.
#[derive(Clone)]
pub struct VisibilitySignal {
    tx: Arc<watch::Sender<Visibility>>,
}

impl VisibilitySignal {
    /// Create a signal that starts in the foreground
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Visibility::Foreground);
        Self { tx: Arc::new(tx) }
    }

    /// Report the current visibility
    pub fn set(&self, visibility: Visibility) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == visibility {
                return false;
            }
            *current = visibility;
            true
        });
        debug!(?visibility, changed, "VisibilitySignal::set");
    }

    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }

    /// Receive every subsequent transition
    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new()
    }
}
