//! Settings loading with `figment`.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. Merge the JSON settings file if it exists (missing file = no-op)
//! 3. Merge `RELAY_*` environment variables, `__` separating sections
//! 4. Validate

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RELAY_";

/// Resolve the relay's home directory (`~/.relay`).
pub fn relay_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay")
}

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    relay_home().join("settings.json")
}

/// Resolve the default database path (`~/.relay/relay.db`).
pub fn default_db_path() -> PathBuf {
    relay_home().join("relay.db")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, defaults plus env overrides are returned.
/// Malformed JSON, mistyped values and failed validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    let settings: RelaySettings = figment(path).extract().map_err(Box::new)?;
    settings.validate()?;
    Ok(settings)
}

/// The layered provider stack, exposed for callers that want to inspect
/// where a value came from.
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(RelaySettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
