//! # orpc-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`OrpcSettings::default()`]
//! 2. **User file**: `~/.orpc/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ORPC_*` overrides (highest priority)
//!
//! The settings are plain values: the composition root loads them once and
//! hands the relevant section to each component.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides, clamp_durations, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{GatewaySettings, LoggingSettings, OrpcSettings, SessionSettings};
