//! Unified error types for the Ember core.
//!
//! Framework-level errors (plugin lifecycle, middleware execution) are
//! defined in `ember-framework`.

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors that can occur while loading, reading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required loader failed; the configuration was not (re)loaded.
    #[error("config loader '{loader}' failed: {source}")]
    Load {
        /// Name of the failing loader.
        loader: String,
        /// The underlying failure.
        #[source]
        source: Box<ConfigError>,
    },

    /// Lookup miss with no default supplied.
    #[error("configuration key not found: {0}")]
    KeyNotFound(String),

    /// A structured document could not be parsed.
    #[error("failed to parse configuration from {origin}: {source}")]
    Parse {
        /// Where the document came from (file path, `<inline>`, storage key).
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    /// A document parsed but its root is not an object.
    #[error("configuration root must be an object, found {0}")]
    NotAnObject(&'static str),

    /// The key cannot be used as a configuration path.
    #[error("invalid configuration key '{0}'")]
    InvalidKey(String),

    /// A value exists but does not have the requested shape.
    #[error("failed to deserialize configuration key '{key}': {source}")]
    Deserialize {
        /// Key that was being read (empty for the whole tree).
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Failed to read a configuration file.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A key/value store rejected an operation.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ConfigError {
    /// Wraps `source` as the failure of the loader named `loader`.
    pub fn load(loader: impl Into<String>, source: ConfigError) -> Self {
        Self::Load {
            loader: loader.into(),
            source: Box::new(source),
        }
    }

    /// Creates a storage error with the given message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Returns `true` if this is a lookup miss.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
