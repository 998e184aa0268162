//! Engine settings definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ember_core::devtools::DEFAULT_CAPACITY;
use serde::{Deserialize, Serialize};

/// Root settings structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineSettings {
    /// Diagnostic recorder settings.
    #[serde(default)]
    pub devtools: DevToolsSettings,

    /// Plugin registry behaviour.
    #[serde(default)]
    pub plugins: PluginSettings,

    /// Application configuration behaviour.
    #[serde(default)]
    pub config: ConfigSettings,

    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Diagnostic recorder settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DevToolsSettings {
    /// Whether the engine records diagnostics at all.
    #[serde(default)]
    pub enabled: bool,

    /// Records kept per kind before the oldest are evicted.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for DevToolsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

/// Plugin registry behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PluginSettings {
    /// Registering a name twice is ignored instead of failing.
    #[serde(default)]
    pub idempotent_register: bool,
}

/// Application configuration behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigSettings {
    /// Subscribe to loaders that can push changes after the initial load.
    #[serde(default)]
    pub watch_sources: bool,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of log output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log output goes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Written to [`LoggingConfig::file_path`].
    File,
}

/// How often a log file is rolled over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging setup.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingConfig {
    /// Base level, used when `RUST_LOG` is not set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Log file, used with [`LogOutput::File`].
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Per-target levels, e.g. `ember_framework = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}
