//! # gqlws-settings
//!
//! Layered configuration for the graphql-ws server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`GqlwsSettings::default()`]
//! 2. **User file**: `~/.gqlws/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `GQLWS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::{ConnectionSettings, GqlwsSettings, ServerSettings};

use std::sync::OnceLock;

static SETTINGS: OnceLock<GqlwsSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.gqlws/settings.json` with env var
/// overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static GqlwsSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            GqlwsSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: GqlwsSettings) -> std::result::Result<(), GqlwsSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = GqlwsSettings::default();
        assert!(settings_path().ends_with(".gqlws/settings.json"));
    }

    #[test]
    fn global_settings_initialize_once() {
        let mut custom = GqlwsSettings::default();
        custom.server.port = 9999;
        assert!(init_settings(custom.clone()).is_ok());
        assert_eq!(get_settings().server.port, 9999);
        assert!(init_settings(custom).is_err());
    }
}
