//! Plugin system for the Ember engine.
//!
//! # Architecture
//!
//! A [`Plugin`] is an installable unit with a unique name, a version, a list
//! of plugins it depends on and two lifecycle hooks. The
//! [`PluginRegistry`] owns registered plugins and drives them through:
//!
//! ```text
//! register() ──► Registered
//!  install() ──► Installed     (hook succeeded)
//!            ──► Failed        (hook returned an error or panicked)
//! uninstall() ──► Uninstalled
//! ```
//!
//! Failed and uninstalled plugins can be installed again.
//!
//! # Options
//!
//! Each plugin declares a typed `Options` associated type. On install the
//! registry resolves the options from, in order: the explicit argument to
//! [`PluginRegistry::install`], the configuration section
//! `plugins.<name>`, and finally `Options::default()`.
//!
//! ```rust,ignore
//! #[derive(Deserialize, Default)]
//! struct GreeterOptions { greeting: String }
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Plugin for Greeter {
//!     type Options = GreeterOptions;
//!
//!     fn name(&self) -> &str { "greeter" }
//!
//!     async fn install(&self, ctx: &PluginContext, options: GreeterOptions) -> Result<(), BoxError> {
//!         ctx.state().set("greeting", json!(options.greeting));
//!         Ok(())
//!     }
//! }
//! ```

mod context;
mod graph;
mod registry;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::BoxError;

pub use context::PluginContext;
pub use registry::{InstallReport, PluginRegistry};

/// An installable extension of the engine.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Typed install options.
    type Options: DeserializeOwned + Default + Send + 'static;

    /// Unique name within a registry.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Names of plugins that must be installed first.
    fn depends_on(&self) -> &[&str] {
        &[]
    }

    /// Installs the plugin. Middleware added through `ctx` is removed again
    /// if this fails.
    async fn install(&self, ctx: &PluginContext, options: Self::Options) -> Result<(), BoxError>;

    /// Releases what [`install`](Self::install) set up. Errors are logged and
    /// do not prevent the uninstall.
    async fn uninstall(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        let _ = ctx;
        Ok(())
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Registered, never installed.
    Registered,
    /// Install hook succeeded.
    Installed,
    /// Install hook failed; may be retried.
    Failed,
    /// Uninstalled after having been installed; may be reinstalled.
    Uninstalled,
}

/// Descriptive view of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub depends_on: Vec<String>,
    pub state: PluginState,
}

// =============================================================================
// Type erasure
// =============================================================================

/// Why an erased install did not succeed.
pub(crate) enum InstallFailure {
    Options(serde_json::Error),
    Hook(BoxError),
}

#[async_trait]
pub(crate) trait ErasedPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn depends_on(&self) -> Vec<String>;
    async fn install(&self, ctx: &PluginContext, options: Option<Value>) -> Result<(), InstallFailure>;
    async fn uninstall(&self, ctx: &PluginContext) -> Result<(), BoxError>;
}

pub(crate) struct ErasedAdapter<P>(pub(crate) P);

#[async_trait]
impl<P: Plugin> ErasedPlugin for ErasedAdapter<P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn version(&self) -> &str {
        self.0.version()
    }

    fn depends_on(&self) -> Vec<String> {
        self.0.depends_on().iter().map(|d| d.to_string()).collect()
    }

    async fn install(&self, ctx: &PluginContext, options: Option<Value>) -> Result<(), InstallFailure> {
        let options = match options {
            None | Some(Value::Null) => P::Options::default(),
            Some(value) => serde_json::from_value(value).map_err(InstallFailure::Options)?,
        };
        self.0.install(ctx, options).await.map_err(InstallFailure::Hook)
    }

    async fn uninstall(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        self.0.uninstall(ctx).await
    }
}
