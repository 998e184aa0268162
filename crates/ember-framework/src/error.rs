//! Error types for the Ember framework.

use std::any::Any;

use thiserror::Error;
use tower::BoxError;

// =============================================================================
// Plugin Errors
// =============================================================================

/// Errors raised by the plugin lifecycle.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A plugin with this name is already registered.
    #[error("plugin '{0}' is already registered")]
    Duplicate(String),

    /// No plugin with this name is registered.
    #[error("plugin '{0}' is not registered")]
    NotFound(String),

    /// A declared dependency is not registered.
    #[error("plugin '{plugin}' depends on '{dependency}', which is not registered")]
    MissingDependency { plugin: String, dependency: String },

    /// Dependency resolution found a cycle; nothing was installed.
    #[error("cyclic plugin dependency: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Plugin names along the cycle, first and last entries equal.
        cycle: Vec<String>,
    },

    /// The plugin is not currently installed.
    #[error("plugin '{0}' is not installed")]
    NotInstalled(String),

    /// Other installed plugins depend on this one.
    #[error("plugin '{plugin}' is required by installed plugins: {}", .dependents.join(", "))]
    DependentPlugin {
        plugin: String,
        dependents: Vec<String>,
    },

    /// The install hook returned an error or panicked.
    #[error("plugin '{plugin}' failed to install: {source}")]
    Install {
        plugin: String,
        #[source]
        source: BoxError,
    },

    /// A dependency could not be installed, so this plugin was skipped.
    #[error("plugin '{plugin}' skipped because dependency '{dependency}' failed")]
    DependencyFailed { plugin: String, dependency: String },

    /// The plugin's options could not be deserialized.
    #[error("invalid options for plugin '{plugin}': {source}")]
    InvalidOptions {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PluginError {
    /// Name of the plugin the error is about.
    pub fn plugin(&self) -> &str {
        match self {
            Self::Duplicate(plugin) | Self::NotFound(plugin) | Self::NotInstalled(plugin) => plugin,
            Self::MissingDependency { plugin, .. }
            | Self::DependentPlugin { plugin, .. }
            | Self::Install { plugin, .. }
            | Self::DependencyFailed { plugin, .. }
            | Self::InvalidOptions { plugin, .. } => plugin,
            Self::CyclicDependency { cycle } => cycle.first().map_or("", String::as_str),
        }
    }
}

// =============================================================================
// Middleware Errors
// =============================================================================

/// A middleware (or the terminal handler) failed while the pipeline ran.
///
/// `middleware` names the link that produced the error, not the outermost
/// link it propagated through.
#[derive(Debug, Error)]
#[error("middleware '{middleware}' failed: {source}")]
pub struct MiddlewareError {
    pub middleware: String,
    #[source]
    pub source: BoxError,
}

impl MiddlewareError {
    pub fn new(middleware: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            middleware: middleware.into(),
            source: source.into(),
        }
    }

    /// Wraps `error` as raised by `middleware`, unless it already is a
    /// `MiddlewareError` raised further inward.
    pub fn attribute(middleware: &str, error: BoxError) -> Self {
        match error.downcast::<MiddlewareError>() {
            Ok(inner) => *inner,
            Err(other) => Self::new(middleware, other),
        }
    }
}

/// A user hook panicked.
#[derive(Debug, Clone, Error)]
#[error("panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

impl PanicError {
    /// Extracts a readable message from a `catch_unwind` payload.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "unknown panic payload".to_string(),
            },
        };
        Self { message }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for plugin lifecycle operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Result type for pipeline runs.
pub type MiddlewareResult<T> = Result<T, MiddlewareError>;
