//! autofetch - keep remote data fresh on a shared polling schedule
//!
//! A [`Coordinator`] wraps one asynchronous [`Producer`] and republishes its
//! result as a [`FetchState`]: fetched once on creation, again on every timer
//! tick while polling is enabled, whenever the dependency key changes, and on
//! demand. A single [`SettingsStore`] holds the interval and the global on/off
//! switch that every Coordinator follows; it persists both to a
//! [`keystore::KeyValueStore`] and pauses polling while the application is
//! in the background.
//!
//! # Modules
//!
//! - [`coordinator`] - per-data-source polling actor
//! - [`settings`] - global interval and enabled flag, visibility signal
//! - [`http`] - JSON-over-HTTP producer
//! - [`view`] - client-side filter, sort and pagination
//! - [`terminal`] - input and rendering for `af watch`
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod http;
pub mod settings;
pub mod terminal;
pub mod view;

pub use config::Config;
pub use coordinator::{
    Coordinator, CoordinatorConfig, CoordinatorError, CoordinatorHandle, CoordinatorMetrics, DependencyKey, FetchPhase,
    FetchState, ManualTriggerMode, Producer, from_fn,
};
pub use http::{HttpError, HttpProducer};
pub use settings::{AutoFetchSettings, SettingsError, SettingsStore, Visibility, VisibilitySignal};
pub use view::{Filter, Page, Sort, ViewQuery, extract_items};
