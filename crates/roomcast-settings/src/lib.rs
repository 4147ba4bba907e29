//! # roomcast-settings
//!
//! Layered configuration for roomcast.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RoomcastSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//!    (`--config`, `$ROOMCAST_CONFIG`, or `./roomcast.json`)
//! 3. **Environment variables**: `ROOMCAST_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_with, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::{
    BrokerKind, BrokerSettings, HubSettings, LoggingSettings, RoomcastSettings, ServerSettings,
};
