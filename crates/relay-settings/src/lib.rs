//! # relay-settings
//!
//! Configuration for the relay server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`RelaySettings::default()`]
//! 2. **Settings file** — `~/.relay/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables** — `RELAY_*` overrides (highest priority)
//!
//! The binary applies command-line flags on top of the loaded value and
//! passes it down explicitly; there is no global settings instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
