//! Coordinator error types

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a Coordinator
///
/// Producer failures are never returned to callers directly; they are stored
/// in [`FetchState::error`](super::FetchState) and read from there. The type
/// is `Clone` so it can live inside the published state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Producer failed: {0}")]
    ProducerFailure(String),

    #[error("Producer timed out after {0:?}")]
    Timeout(Duration),
}

impl CoordinatorError {
    /// Build a producer failure from any error report, keeping the cause chain
    pub fn producer(err: eyre::Report) -> Self {
        CoordinatorError::ProducerFailure(format!("{:#}", err))
    }

    /// Check if this error came from a fetch attempt (as opposed to setup)
    pub fn is_fetch_failure(&self) -> bool {
        match self {
            CoordinatorError::ProducerFailure(_) => true,
            CoordinatorError::Timeout(_) => true,
            CoordinatorError::InvalidConfiguration(_) => false,
        }
    }
}
