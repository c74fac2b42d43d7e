//! Layered configuration.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SpacesSettings::default()`]
//! 2. **User file**: `~/.spaces/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SPACES_*` overrides (highest priority)

mod errors;
mod loader;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides, deep_merge, load_settings, load_settings_from_path, parse_usize_range,
    settings_path, spaces_home,
};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpacesSettings {
    pub hierarchy: HierarchySettings,
    pub events: EventSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HierarchySettings {
    /// Maximum number of levels in the space tree. A root sits at depth 1.
    pub max_depth: usize,
}

impl Default for HierarchySettings {
    fn default() -> Self {
        Self { max_depth: 10 }
    }
}

/// Which dispatcher the aggregators are wired to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Handlers run inline; the publisher returns after all of them finish.
    #[default]
    Sync,
    /// Handlers run detached on the runtime's blocking pool.
    Async,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    pub dispatch: DispatchMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level directive. `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: spaces_home().join("database").join("spaces.db"),
        }
    }
}
