//! Settings of the engine itself.
//!
//! Loaded with figment from defaults, TOML files and `EMBER_*` environment
//! variables. Application configuration is separate and lives in
//! [`ConfigManager`](ember_core::ConfigManager).

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{PROFILE_ENV, Profile, SettingsLoader};
pub use schema::{
    ConfigSettings, DevToolsSettings, EngineSettings, LogFormat, LogLevel, LogOutput,
    LogRotation, LoggingConfig, PluginSettings, SpanEventConfig,
};
pub use validation::validate_settings;
