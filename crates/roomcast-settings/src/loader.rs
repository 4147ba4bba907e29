//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RoomcastSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `ROOMCAST_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{BrokerKind, RoomcastSettings};

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "ROOMCAST_CONFIG";

/// Default settings file: `$ROOMCAST_CONFIG`, else `./roomcast.json`.
pub fn settings_path() -> PathBuf {
    std::env::var(CONFIG_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("roomcast.json"), PathBuf::from)
}

/// Load settings from `path` (or [`settings_path`]) with env overrides.
pub fn load_settings(path: Option<&Path>) -> Result<RoomcastSettings> {
    match path {
        Some(p) => load_settings_from_path(p),
        None => load_settings_from_path(&settings_path()),
    }
}

/// Load settings from a specific path with env overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RoomcastSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_layers(path: &Path) -> Result<RoomcastSettings> {
    let defaults = serde_json::to_value(RoomcastSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values. See the module docs for rules.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ROOMCAST_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RoomcastSettings) {
    apply_overrides_with(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning.
pub fn apply_overrides_with(settings: &mut RoomcastSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("ROOMCAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("ROOMCAST_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("ROOMCAST_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("ROOMCAST_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("ROOMCAST_HEARTBEAT_TIMEOUT_MS", 100, 3_600_000) {
        settings.server.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.usize("ROOMCAST_MAX_MESSAGE_SIZE", 64, 16 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = env.usize("ROOMCAST_SEND_QUEUE", 1, 65_536) {
        settings.server.send_queue = v;
    }

    if let Some(v) = env.u64("ROOMCAST_SEND_TIMEOUT_MS", 1, 60_000) {
        settings.hub.send_timeout_ms = v;
    }
    if let Some(v) = env.u64("ROOMCAST_SWEEP_INTERVAL_MS", 10, 3_600_000) {
        settings.hub.sweep_interval_ms = v;
    }
    if let Some(v) = env.u64("ROOMCAST_RECONNECT_BASE_MS", 1, 60_000) {
        settings.hub.reconnect_base_ms = v;
    }
    if let Some(v) = env.u64("ROOMCAST_RECONNECT_MAX_MS", 1, 3_600_000) {
        settings.hub.reconnect_max_ms = v;
    }

    if let Some(v) = env.string("ROOMCAST_BROKER") {
        match v.parse::<BrokerKind>() {
            Ok(kind) => settings.broker.kind = kind,
            Err(_) => warn!(key = "ROOMCAST_BROKER", value = %v, "invalid broker kind, ignoring"),
        }
    }
    if let Some(v) = env.string("ROOMCAST_BROKER_ADDR") {
        settings.broker.address = v;
    }
    if let Some(v) = env.u64("ROOMCAST_BROKER_CONNECT_TIMEOUT_MS", 10, 120_000) {
        settings.broker.connect_timeout_ms = v;
    }

    if let Some(v) = env.string("ROOMCAST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("ROOMCAST_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` within `min..=max`.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within `min..=max`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn checked<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.raw(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.checked(name, parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.checked(name, |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.checked(name, |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.checked(name, |v| parse_usize_range(v, min, max))
    }
}
