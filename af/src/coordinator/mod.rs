//! Coordinator - keeps one piece of remote data fresh
//!
//! A Coordinator owns a [`Producer`] and runs it:
//! - once on construction
//! - on a timer while polling is enabled both locally and globally
//! - whenever the dependency key changes
//! - on demand via [`CoordinatorHandle::trigger`]
//!
//! The resulting [`FetchState`] is published through a watch channel so any
//! number of readers can observe it. Timer ticks that land while a fetch is
//! in flight are coalesced, failures keep the last good data, and nothing is
//! published after disposal.

mod config;
mod core;
mod error;
mod handle;
mod messages;
mod producer;
mod state;

pub use config::{BackoffConfig, CoordinatorConfig, DependencyKey, ManualTriggerMode, same_key, validate_key};
pub use self::core::Coordinator;
pub use error::CoordinatorError;
pub use handle::CoordinatorHandle;
pub use messages::{CoordRequest, CoordinatorMetrics, TriggerKind};
pub use producer::{FnProducer, Producer, from_fn};
pub use state::{FetchPhase, FetchState};
