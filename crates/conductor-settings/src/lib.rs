//! # conductor-settings
//!
//! Layered configuration for the conductor.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ConductorSettings::default()`]
//! 2. **User file**: `~/.conductor/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CONDUCTOR_*` overrides (highest priority)
//!
//! There is no global instance. The entry point loads settings once and
//! hands them to the orchestrator it constructs.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with_env, settings_path,
};
pub use types::*;
