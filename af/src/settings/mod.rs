//! Global auto-fetch settings
//!
//! A single [`SettingsStore`] holds the polling interval and the global
//! on/off switch for every Coordinator, persists them to a key-value store,
//! and pauses polling while the application is in the background.

mod store;
mod visibility;

pub use store::{
    AutoFetchSettings, DEFAULT_INTERVAL_MS, ENABLED_KEY, INTERVAL_KEY, SettingsError, SettingsStore,
};
pub use visibility::{Visibility, VisibilitySignal};
