//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LoomSettings::default()`]
//! 2. If `~/.loom/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `LOOM_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::LoomSettings;

/// Resolve the path to the settings file (`~/.loom/settings.json`).
pub fn settings_path() -> PathBuf {
    loom_home().join("settings.json")
}

/// Resolve `~/.loom`.
pub fn loom_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".loom")
}

/// Expand a leading `~/` against `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LoomSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<LoomSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<LoomSettings> {
    let defaults = serde_json::to_value(LoomSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: LoomSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, &EnvReader(env));
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

/// Apply process environment overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut LoomSettings) {
    apply_overrides(settings, &EnvReader(|name: &str| std::env::var(name).ok()));
}

fn apply_overrides<F: Fn(&str) -> Option<String>>(settings: &mut LoomSettings, env: &EnvReader<F>) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("LOOM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("LOOM_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("LOOM_DB_PATH") {
        settings.server.db_path = v;
    }

    // ── Runtime ─────────────────────────────────────────────────────
    if let Some(v) = env.u64("LOOM_MAX_ITERATIONS", 1, 1_000) {
        settings.runtime.max_iterations = u32::try_from(v).unwrap_or(settings.runtime.max_iterations);
    }
    if let Some(v) = env.usize("LOOM_DEDUP_WINDOW", 0, 1_000) {
        settings.runtime.dedup_window_turns = v;
    }

    // ── Jobs ────────────────────────────────────────────────────────
    if let Some(v) = env.usize("LOOM_WORKERS", 1, 256) {
        settings.jobs.worker_count = v;
    }
    if let Some(v) = env.u64("LOOM_POLL_INTERVAL_MS", 10, 600_000) {
        settings.jobs.poll_interval_ms = v;
    }

    // ── Subagents ───────────────────────────────────────────────────
    if let Some(v) = env.usize("LOOM_SUBAGENT_PARALLEL", 1, 64) {
        settings.subagents.max_parallel = v;
    }
    if let Some(v) = env.u64("LOOM_SUBAGENT_TIMEOUT", 1, 86_400) {
        settings.subagents.default_timeout_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("LOOM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("LOOM_LOG_JSON") {
        settings.logging.json = v;
    }
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.0)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.0)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.0)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.0)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
