//! SettingsStore - shared auto-fetch cadence and on/off switch
//!
//! One store is created per application run and handed to every
//! Coordinator. Changes are persisted to a [`KeyValueStore`] and broadcast to
//! subscribers through a watch channel.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use keystore::KeyValueStore;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::visibility::{Visibility, VisibilitySignal};

/// Storage key for the polling interval (decimal milliseconds)
pub const INTERVAL_KEY: &str = "autoFetchInterval";

/// Storage key for the global enabled flag (`true` / `false`)
pub const ENABLED_KEY: &str = "autoFetchEnabled";

/// Interval used when nothing usable is persisted
pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

/// Errors from settings mutations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Current global auto-fetch settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoFetchSettings {
    /// Delay between automatic re-fetches
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,

    /// Whether automatic polling is currently permitted
    #[serde(rename = "global-enabled")]
    pub global_enabled: bool,
}

impl Default for AutoFetchSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            global_enabled: true,
        }
    }
}

impl AutoFetchSettings {
    /// Get the interval as a Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

struct Inner {
    tx: watch::Sender<AutoFetchSettings>,
    storage: Arc<dyn KeyValueStore>,
    visibility_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.visibility_task.get_mut().ok().and_then(|t| t.take()) {
            task.abort();
        }
    }
}

/// Handle to the process-wide auto-fetch settings
///
/// Cloning the handle shares the same settings; there is no global instance.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Inner>,
}

impl SettingsStore {
    /// Open the store, seeding state from persisted values
    ///
    /// Missing or unparsable values fall back to the defaults; that is logged
    /// and never reported as an error.
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Self {
        let settings = load_settings(storage.as_ref());
        info!(
            interval_ms = settings.interval_ms,
            global_enabled = settings.global_enabled,
            "SettingsStore opened"
        );

        let (tx, _) = watch::channel(settings);
        Self {
            inner: Arc::new(Inner {
                tx,
                storage,
                visibility_task: Mutex::new(None),
            }),
        }
    }

    /// Open the store and follow an application visibility signal
    ///
    /// Going to the background disables auto-fetch globally, coming back to
    /// the foreground enables it. Must be called from within a tokio runtime.
    pub fn with_visibility(storage: Arc<dyn KeyValueStore>, signal: &VisibilitySignal) -> Self {
        let store = Self::open(storage);
        store.attach_visibility(signal.subscribe());
        store
    }

    fn attach_visibility(&self, mut rx: watch::Receiver<Visibility>) {
        debug!("SettingsStore::attach_visibility: called");
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let visibility = *rx.borrow_and_update();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SettingsStore { inner }.on_visibility(visibility);
            }
            debug!("SettingsStore: visibility subscription ended");
        });

        let mut slot = self.inner.visibility_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    fn on_visibility(&self, visibility: Visibility) {
        info!(?visibility, "Application visibility changed");
        match visibility {
            Visibility::Background => self.set_global_enabled(false),
            Visibility::Foreground => self.set_global_enabled(true),
        }
    }

    /// Current settings
    pub fn get(&self) -> AutoFetchSettings {
        *self.inner.tx.borrow()
    }

    /// Change the polling interval
    pub fn set_interval(&self, ms: u64) -> Result<(), SettingsError> {
        debug!(ms, "SettingsStore::set_interval: called");
        if ms == 0 {
            return Err(SettingsError::InvalidArgument(
                "interval must be greater than zero".to_string(),
            ));
        }
        self.update(|s| s.interval_ms = ms);
        Ok(())
    }

    /// Permit or stop automatic polling everywhere
    pub fn set_global_enabled(&self, flag: bool) {
        debug!(flag, "SettingsStore::set_global_enabled: called");
        self.update(|s| s.global_enabled = flag);
    }

    /// Flip the global enabled flag
    pub fn toggle_global_enabled(&self) {
        debug!("SettingsStore::toggle_global_enabled: called");
        self.update(|s| s.global_enabled = !s.global_enabled);
    }

    /// Receive every subsequent settings change
    pub fn subscribe(&self) -> watch::Receiver<AutoFetchSettings> {
        self.inner.tx.subscribe()
    }

    /// Stop following the visibility signal
    pub fn dispose(&self) {
        debug!("SettingsStore::dispose: called");
        let mut slot = self.inner.visibility_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }

    /// Apply `f` and persist the result while still holding the watch lock,
    /// so concurrent setters reach storage in the order they were applied
    fn update(&self, f: impl FnOnce(&mut AutoFetchSettings)) {
        self.inner.tx.send_if_modified(|settings| {
            let before = *settings;
            f(settings);
            self.persist(settings);
            *settings != before
        });
    }

    /// Write both fields; failures are logged, never returned
    fn persist(&self, settings: &AutoFetchSettings) {
        let storage = self.inner.storage.as_ref();
        if let Err(e) = storage.set(INTERVAL_KEY, &settings.interval_ms.to_string()) {
            warn!(error = %e, key = INTERVAL_KEY, "Failed to persist setting");
        }
        if let Err(e) = storage.set(ENABLED_KEY, &settings.global_enabled.to_string()) {
            warn!(error = %e, key = ENABLED_KEY, "Failed to persist setting");
        }
    }
}

fn load_settings(storage: &dyn KeyValueStore) -> AutoFetchSettings {
    let mut settings = AutoFetchSettings::default();

    if let Some(raw) = read_key(storage, INTERVAL_KEY) {
        match parse_interval(&raw) {
            Some(ms) => settings.interval_ms = ms,
            None => warn!(key = INTERVAL_KEY, %raw, "Ignoring unparsable setting, using default"),
        }
    }

    if let Some(raw) = read_key(storage, ENABLED_KEY) {
        match parse_enabled(&raw) {
            Some(flag) => settings.global_enabled = flag,
            None => warn!(key = ENABLED_KEY, %raw, "Ignoring unparsable setting, using default"),
        }
    }

    settings
}

fn read_key(storage: &dyn KeyValueStore, key: &str) -> Option<String> {
    match storage.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, key, "Failed to read setting, using default");
            None
        }
    }
}

fn parse_interval(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|ms| *ms > 0)
}

fn parse_enabled(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
