//! Tracing subscriber setup.

use spaces_core::settings::LoggingSettings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default level directive. Overridden by RUST_LOG env var.
    pub log_level: String,
    /// Per-module level overrides (e.g. "spaces_engine" => "debug").
    pub module_levels: Vec<(String, String)>,
    /// JSON lines on stderr instead of the human-readable format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl From<&LoggingSettings> for TelemetryConfig {
    fn from(settings: &LoggingSettings) -> Self {
        Self {
            log_level: settings.level.clone(),
            module_levels: Vec::new(),
            json: settings.json,
        }
    }
}

impl TelemetryConfig {
    pub fn with_module_level(mut self, module: impl Into<String>, level: impl Into<String>) -> Self {
        self.module_levels.push((module.into(), level.into()));
        self
    }

    /// The directive string handed to `EnvFilter` when RUST_LOG is unset.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_lowercase()));
        }
        filter
    }
}

/// Install the global subscriber. Call once at startup.
///
/// Returns false if a subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_overrides() {
        let config = TelemetryConfig::default()
            .with_module_level("spaces_engine", "DEBUG")
            .with_module_level("spaces_store", "warn");
        assert_eq!(
            config.filter_directives(),
            "info,spaces_engine=debug,spaces_store=warn"
        );
    }

    #[test]
    fn from_logging_settings() {
        let settings = LoggingSettings {
            level: "warn".to_string(),
            json: false,
        };
        let config = TelemetryConfig::from(&settings);
        assert_eq!(config.filter_directives(), "warn");
        assert!(!config.json);
    }

    #[test]
    fn second_init_reports_existing_subscriber() {
        let config = TelemetryConfig {
            json: false,
            ..Default::default()
        };
        let _ = init_telemetry(&config);
        assert!(!init_telemetry(&config));
    }
}
