//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ScoutSettings::default()`]
//! 2. If `~/.scout/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `SCOUT_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ScoutSettings;

/// Resolve the path to the settings file (`~/.scout/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".scout").join("settings.json")
}

/// Load settings from `path`, resolving `SCOUT_*` overrides through `env`.
///
/// Pass `&|name| std::env::var(name).ok()` for the process environment.
/// A missing file yields defaults. Invalid JSON or a configuration that
/// fails validation is an error.
pub fn load_settings_with_env(
    path: &Path,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<ScoutSettings> {
    let defaults = serde_json::to_value(ScoutSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ScoutSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `SCOUT_*` overrides resolved through `env`.
///
/// Invalid values are ignored with a warning and the file/default value
/// stays in place.
pub fn apply_overrides(settings: &mut ScoutSettings, env: &dyn Fn(&str) -> Option<String>) {
    // ── Stream settings ─────────────────────────────────────────────
    if let Some(v) = read_string(env, "SCOUT_STREAM_URL") {
        settings.stream.endpoint = v;
    }
    if let Some(v) = read_u64(env, "SCOUT_RETRY_INITIAL_MS", 1, 600_000) {
        settings.stream.initial_retry_delay_ms = v;
    }
    if let Some(v) = read_u64(env, "SCOUT_RETRY_MAX_MS", 1, 3_600_000) {
        settings.stream.max_retry_delay_ms = v;
    }
    if let Some(v) = read_u64(env, "SCOUT_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.stream.connect_timeout_ms = v;
    }

    // ── Reachability settings ───────────────────────────────────────
    if let Some(v) = read_bool(env, "SCOUT_REACHABILITY_ENABLED") {
        settings.reachability.enabled = v;
    }
    if let Some(v) = read_u64(env, "SCOUT_PROBE_INTERVAL_MS", 100, 3_600_000) {
        settings.reachability.probe_interval_ms = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = read_string(env, "SCOUT_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

fn read_string(env: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    env(name).filter(|v| !v.is_empty())
}

fn read_bool(env: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let val = env(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_u64(env: &dyn Fn(&str) -> Option<String>, name: &str, min: u64, max: u64) -> Option<u64> {
    let val = env(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
