//! Runtime error types.

use std::path::PathBuf;

use ember_core::ConfigError;
use ember_framework::{MiddlewareError, PluginError};
use thiserror::Error;

/// Errors that can occur while loading engine settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// An explicitly requested settings file does not exist.
    #[error("Settings file not found: {0}")]
    FileNotFound(PathBuf),

    /// The settings file has an extension no enabled format handles.
    #[error("Unsupported or disabled settings file format: .{0}")]
    UnsupportedFormat(String),

    /// Figment could not extract the settings.
    #[error("Failed to extract settings: {0}")]
    Extract(#[from] Box<figment::Error>),

    /// Settings were extracted but are not usable.
    #[error("Invalid settings: {message}")]
    Validation { message: String },
}

impl SettingsError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl From<figment::Error> for SettingsError {
    fn from(error: figment::Error) -> Self {
        Self::Extract(Box::new(error))
    }
}

/// Errors that can occur while building or driving an engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine settings could not be loaded.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Application configuration failed to load or was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A plugin lifecycle operation failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The middleware pipeline failed.
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),
}

/// Result type for settings loading.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
