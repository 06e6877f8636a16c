//! Published fetch state

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::CoordinatorError;

/// Lifecycle phase of a Coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPhase {
    /// No fetch has started yet
    Idle,
    /// A producer call is outstanding
    Fetching,
    /// The last call completed, successfully or not
    Settled,
    /// Torn down; the state no longer changes
    Disposed,
}

impl FetchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchPhase::Idle => "idle",
            FetchPhase::Fetching => "fetching",
            FetchPhase::Settled => "settled",
            FetchPhase::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for FetchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of what a Coordinator currently knows
///
/// `data` survives failed fetches (stale-while-revalidate) and is only
/// replaced by the next successful one.
#[derive(Debug, Clone, Serialize)]
pub struct FetchState<T> {
    /// Last successfully produced value
    pub data: Option<T>,

    /// True while a fetch is in flight
    #[serde(rename = "is-loading")]
    pub is_loading: bool,

    /// Last failure, cleared by the next success
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<CoordinatorError>,

    /// Lifecycle phase
    pub phase: FetchPhase,

    /// When the last fetch settled
    #[serde(rename = "updated-at")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
            phase: FetchPhase::Idle,
            updated_at: None,
        }
    }
}

impl<T> FetchState<T> {
    /// Mark a fetch as started
    pub(crate) fn begin(&mut self) {
        self.is_loading = true;
        self.phase = FetchPhase::Fetching;
    }

    /// Record a settled fetch
    ///
    /// A failure leaves `data` untouched.
    pub(crate) fn settle(&mut self, result: Result<T, CoordinatorError>) {
        match result {
            Ok(data) => {
                self.data = Some(data);
                self.error = None;
            }
            Err(e) => {
                self.error = Some(e);
            }
        }
        self.is_loading = false;
        self.phase = FetchPhase::Settled;
        self.updated_at = Some(Utc::now());
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == FetchPhase::Disposed
    }
}

fn serialize_error<S>(error: &Option<CoordinatorError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}
