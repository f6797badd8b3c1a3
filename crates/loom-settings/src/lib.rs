//! # loom-settings
//!
//! Configuration with layered sources for Loom.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LoomSettings::default()`]
//! 2. **User file**: `~/.loom/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LOOM_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, expand_home, load_settings, load_settings_from_path, loom_home,
    settings_path,
};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<LoomSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads `~/.loom/settings.json` with env overrides, falling
/// back to compiled defaults if loading fails.
pub fn get_settings() -> &'static LoomSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            LoomSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: LoomSettings) -> std::result::Result<(), LoomSettings> {
    SETTINGS.set(settings)
}
