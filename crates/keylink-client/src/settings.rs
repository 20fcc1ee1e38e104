//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with [`ClientConfig::default()`]
//! 2. If `~/.keylink/client.json` exists, deep-merge user values over defaults
//! 3. Apply `KEYLINK_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - `null` in source replaces the target (`livenessTimeoutMs: null` disables
//!   the liveness check)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::config::{ClientConfig, MAX_TIMEOUT_MS};
use crate::errors::SettingsError;

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Overrides the daemon URL.
pub const ENV_URL: &str = "KEYLINK_URL";
/// Overrides `requestTimeoutMs`.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "KEYLINK_REQUEST_TIMEOUT_MS";
/// Overrides `handshakeTimeoutMs`.
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "KEYLINK_HANDSHAKE_TIMEOUT_MS";
/// Overrides `reconnect.maxAttempts`.
pub const ENV_RECONNECT_ATTEMPTS: &str = "KEYLINK_RECONNECT_ATTEMPTS";
/// Switches the backoff to a fixed delay of this many milliseconds.
pub const ENV_RECONNECT_DELAY_MS: &str = "KEYLINK_RECONNECT_DELAY_MS";
/// Overrides `announceSubscriptions`.
pub const ENV_ANNOUNCE_SUBSCRIPTIONS: &str = "KEYLINK_ANNOUNCE_SUBSCRIPTIONS";

const MAX_ATTEMPTS: u64 = 1000;

/// Resolve the path to the settings file (`~/.keylink/client.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".keylink").join("client.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClientConfig> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<ClientConfig> {
    let mut config = load_file(path)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn load_file(path: &Path) -> Result<ClientConfig> {
    let defaults = serde_json::to_value(ClientConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading client settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "client settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                let merged = match target_map.remove(&key) {
                    Some(target_val) if source_val.is_object() => deep_merge(target_val, source_val),
                    _ => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `KEYLINK_*` environment variable overrides.
pub fn apply_env_overrides(config: &mut ClientConfig) {
    apply_overrides(config, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_overrides<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_URL).filter(|u| !u.trim().is_empty()) {
        config.url = url.trim().to_string();
    }
    if let Some(ms) = read_u64(&lookup, ENV_REQUEST_TIMEOUT_MS, 1, MAX_TIMEOUT_MS) {
        config.request_timeout_ms = ms;
    }
    if let Some(ms) = read_u64(&lookup, ENV_HANDSHAKE_TIMEOUT_MS, 1, MAX_TIMEOUT_MS) {
        config.handshake_timeout_ms = ms;
    }
    if let Some(n) = read_u64(&lookup, ENV_RECONNECT_ATTEMPTS, 0, MAX_ATTEMPTS) {
        config.reconnect.max_attempts = u32::try_from(n).unwrap_or(u32::MAX);
    }
    if let Some(ms) = read_u64(&lookup, ENV_RECONNECT_DELAY_MS, 0, MAX_TIMEOUT_MS) {
        config.reconnect.backoff = Backoff::Fixed { delay_ms: ms };
    }
    if let Some(flag) = read_bool(&lookup, ENV_ANNOUNCE_SUBSCRIPTIONS) {
        config.announce_subscriptions = flag;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn read_u64<F>(lookup: &F, name: &str, min: u64, max: u64) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_bool<F>(lookup: &F, name: &str) -> Option<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let val = lookup(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid bool env var, ignoring");
    }
    result
}
