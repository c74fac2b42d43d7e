//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::errors::Result;
use super::{DispatchMode, SpacesSettings};

/// `~/.spaces`, falling back to `/tmp/.spaces` without a home directory.
pub fn spaces_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".spaces")
}

pub fn settings_path() -> PathBuf {
    spaces_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SpacesSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SpacesSettings> {
    let defaults = serde_json::to_value(SpacesSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SpacesSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

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
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SPACES_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut SpacesSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(val) = read("SPACES_MAX_DEPTH") {
        match parse_usize_range(&val, 1, 1024) {
            Some(depth) => settings.hierarchy.max_depth = depth,
            None => tracing::warn!(key = "SPACES_MAX_DEPTH", value = %val, "invalid depth, ignoring"),
        }
    }
    if let Some(val) = read("SPACES_DB_PATH") {
        settings.database.path = PathBuf::from(val);
    }
    if let Some(val) = read("SPACES_LOG_LEVEL") {
        settings.logging.level = val;
    }
    if let Some(val) = read("SPACES_DISPATCH") {
        match val.to_lowercase().as_str() {
            "sync" => settings.events.dispatch = DispatchMode::Sync,
            "async" => settings.events.dispatch = DispatchMode::Async,
            _ => tracing::warn!(key = "SPACES_DISPATCH", value = %val, "unknown dispatch mode, ignoring"),
        }
    }
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
