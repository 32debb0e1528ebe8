//! # ember-settings
//!
//! Configuration for the Ember realtime client, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`EmberSettings::default()`]
//! 2. **User file**: `~/.ember/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `EMBER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<EmberSettings> = OnceLock::new();

/// Process-wide settings for binaries.
///
/// Loads on first access and falls back to compiled defaults if loading
/// fails. Library code takes settings by value instead.
pub fn get_settings() -> &'static EmberSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            EmberSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the value back if settings were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: EmberSettings) -> std::result::Result<(), EmberSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = EmberSettings::default();
        let path = settings_path();
        assert!(path.ends_with(".ember/settings.json"));
    }
}
