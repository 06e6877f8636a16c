//! KeyStore - durable key-value string store
//!
//! Small persistent map of string keys to string values, used to keep
//! application preferences (such as auto-fetch settings) across restarts.
//!
//! # Architecture
//!
//! ```text
//! ~/.local/share/keystore/
//! ├── store.json       # {"key": "value", ...}
//! └── store.json.lock  # advisory lock held during writes
//! ```
//!
//! # Example
//!
//! ```ignore
//! use keystore::{FileStore, KeyValueStore};
//!
//! let store = FileStore::open("settings.json")?;
//! store.set("autoFetchInterval", "30000")?;
//! assert_eq!(store.get("autoFetchInterval")?.as_deref(), Some("30000"));
//! ```

pub mod cli;
pub mod config;
mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{FileStore, KeyValueStore};

/// Default file name for a store created from configuration
pub const DEFAULT_STORE_FILE: &str = "store.json";
