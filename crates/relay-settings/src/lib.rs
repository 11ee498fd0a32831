//! # relay-settings
//!
//! Configuration for the workspace relay, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.relay/settings.json` or an explicit path
//! 3. **Environment variables**: `RELAY_*` overrides, nested with `__`
//!    (e.g. `RELAY_PRESENCE__IDLE_THRESHOLD_SECS=45`)
//!
//! Loaded settings are validated before they are handed out.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    default_db_path, load_settings, load_settings_from_path, relay_home, settings_path,
};
pub use types::*;
