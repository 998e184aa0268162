//! # Ember Framework
//!
//! Plugin lifecycle and middleware orchestration for the Ember engine.
//!
//! This layer provides:
//! - The [`Plugin`] trait with typed install options
//! - [`PluginRegistry`] for dependency-ordered install and uninstall with
//!   per-plugin failure isolation
//! - The [`Middleware`] trait and the onion-model [`MiddlewarePipeline`]
//! - Tower integration through [`PipelineService`] and [`PipelineLayer`]
//!
//! Everything here works against the shared
//! [`EngineContext`](ember_core::EngineContext) from `ember-core`.

pub mod error;
pub mod middleware;
pub mod plugin;

pub use error::{MiddlewareError, MiddlewareResult, PanicError, PluginError, PluginResult};
pub use middleware::{
    Middleware, MiddlewareFn, MiddlewarePipeline, Next, PipelineLayer, PipelineService,
    TERMINAL_NAME, Terminal, middleware_fn, terminal_fn,
};
pub use plugin::{InstallReport, Plugin, PluginContext, PluginInfo, PluginRegistry, PluginState};

pub use tower::BoxError;
