//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`OrpcSettings::default()`]
//! 2. If `~/.orpc/settings.json` exists, deep-merge user values over defaults
//! 3. Clamp millisecond values from the file into their valid ranges
//! 4. Apply `ORPC_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::OrpcSettings;

const HEARTBEAT_INTERVAL_RANGE: (u64, u64) = (100, 3_600_000);
const HEARTBEAT_TIMEOUT_RANGE: (u64, u64) = (100, 600_000);
const RESPONSE_TIMEOUT_RANGE: (u64, u64) = (100, 600_000);

/// Resolve the path to the settings file (`~/.orpc/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".orpc").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<OrpcSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<OrpcSettings> {
    let defaults = serde_json::to_value(OrpcSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: OrpcSettings = serde_json::from_value(merged)?;
    clamp_durations(&mut settings);
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Pull millisecond settings into the ranges the env overrides accept.
///
/// Out-of-range values are logged and clamped to the nearest bound.
pub fn clamp_durations(settings: &mut OrpcSettings) {
    clamp_ms(
        "session.heartbeatIntervalMs",
        &mut settings.session.heartbeat_interval_ms,
        HEARTBEAT_INTERVAL_RANGE,
    );
    clamp_ms(
        "session.heartbeatTimeoutMs",
        &mut settings.session.heartbeat_timeout_ms,
        HEARTBEAT_TIMEOUT_RANGE,
    );
    clamp_ms(
        "gateway.responseTimeoutMs",
        &mut settings.gateway.response_timeout_ms,
        RESPONSE_TIMEOUT_RANGE,
    );
}

fn clamp_ms(key: &str, value: &mut u64, (min, max): (u64, u64)) {
    let clamped = (*value).clamp(min, max);
    if clamped != *value {
        warn!(key, value = *value, clamped, "millisecond setting out of range, clamping");
        *value = clamped;
    }
}

/// Apply overrides from a variable lookup (the process environment in
/// production).
///
/// Out-of-range or unparsable values are logged and ignored.
pub fn apply_overrides(settings: &mut OrpcSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read_ms = |name: &str, (min, max): (u64, u64)| -> Option<u64> {
        let val = lookup(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            warn!(key = name, value = %val, "invalid millisecond env var, ignoring");
        }
        parsed
    };
    let read_string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read_ms("ORPC_HEARTBEAT_INTERVAL", HEARTBEAT_INTERVAL_RANGE) {
        settings.session.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_ms("ORPC_HEARTBEAT_TIMEOUT", HEARTBEAT_TIMEOUT_RANGE) {
        settings.session.heartbeat_timeout_ms = v;
    }
    if let Some(v) = read_ms("ORPC_RESPONSE_TIMEOUT", RESPONSE_TIMEOUT_RANGE) {
        settings.gateway.response_timeout_ms = v;
    }
    if let Some(v) = read_string("ORPC_GATEWAY_URL") {
        settings.gateway.url = v;
    }
    if let Some(v) = read_string("ORPC_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = lookup("ORPC_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "ORPC_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}
