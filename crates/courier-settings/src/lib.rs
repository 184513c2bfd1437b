//! # courier-settings
//!
//! Configuration for the Courier relay, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`CourierSettings::default()`]
//! 2. **User file**: `~/.courier/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `COURIER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{courier_home, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
