//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GqlwsSettings::default()`]
//! 2. If `~/.gqlws/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `GQLWS_*` environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GqlwsSettings;

/// Resolve the path to the settings file (`~/.gqlws/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gqlws").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GqlwsSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<GqlwsSettings> {
    let defaults = serde_json::to_value(GqlwsSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GqlwsSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_env_overrides(settings: &mut GqlwsSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("GQLWS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_num("GQLWS_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("GQLWS_PATH") {
        settings.server.path = v;
    }
    if let Some(v) = read_env_num("GQLWS_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_bool("GQLWS_METRICS") {
        settings.server.metrics_enabled = v;
    }

    // ── Connection ──────────────────────────────────────────────────
    if let Some(v) = read_env_num("GQLWS_READ_LIMIT", 64, 64 * 1024 * 1024) {
        settings.connection.read_limit = v;
    }
    if let Some(v) = read_env_num("GQLWS_WRITE_TIMEOUT_MS", 1, 600_000) {
        settings.connection.write_timeout_ms = v;
    }
    if let Some(v) = read_env_num("GQLWS_EXEC_TIMEOUT_MS", 1, 3_600_000) {
        settings.connection.exec_timeout_ms = v;
    }
    if let Some(v) = read_env_num("GQLWS_KEEP_ALIVE_MS", 0, 3_600_000) {
        settings.connection.keep_alive_ms = v;
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &GqlwsSettings) -> Result<()> {
    if !settings.server.path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "server.path must start with '/': {}",
            settings.server.path
        )));
    }
    if settings.server.max_connections == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxConnections must be positive".into(),
        ));
    }
    if settings.connection.read_limit == 0 {
        return Err(SettingsError::InvalidValue(
            "connection.readLimit must be positive".into(),
        ));
    }
    if settings.connection.write_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "connection.writeTimeoutMs must be positive".into(),
        ));
    }
    if settings.connection.exec_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "connection.execTimeoutMs must be positive".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a number and accept it only within `min..=max`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim()
        .parse()
        .ok()
        .filter(|n| (min..=max).contains(n))
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_num<T>(name: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let val = std::env::var(name).ok()?;
    let result = parse_in_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, %min, %max, "out-of-range env var, ignoring");
    }
    result
}
