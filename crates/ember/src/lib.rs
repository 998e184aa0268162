//! # Ember
//!
//! The engine runtime core that framework adapters build on: plugins with a
//! dependency-aware lifecycle, an onion-model middleware pipeline, layered
//! observable configuration and a bounded diagnostics recorder.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────────────────────┐
//! │ ConfigLoader │────▶│ ConfigManager │────▶│ EngineContext                │
//! │   (x N)      │     │  merge/watch  │     │  state store · event bus     │
//! └──────────────┘     └───────────────┘     └──────────────────────────────┘
//!                                                 ▲                  ▲
//!                          install(ctx, options)  │                  │ execute(ctx, next)
//!                                    ┌────────────┴───┐     ┌────────┴───────────┐
//!                                    │ PluginRegistry │────▶│ MiddlewarePipeline │
//!                                    └────────────────┘     └────────────────────┘
//! ```
//!
//! - **ember-core**: configuration, context, devtools recorder
//! - **ember-framework**: plugins and middleware
//! - **ember-runtime**: the composed [`Engine`](runtime::Engine), settings and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ember::prelude::*;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl Plugin for Logger {
//!     type Options = ();
//!
//!     fn name(&self) -> &str { "logger" }
//!
//!     async fn install(&self, ctx: &PluginContext, _: ()) -> Result<(), BoxError> {
//!         ctx.add_middleware(middleware_fn("logger", 100, |ctx: Arc<EngineContext>, next: Next| async move {
//!             ctx.events().emit("start", json!(null));
//!             let result = next.run(Arc::clone(&ctx)).await;
//!             ctx.events().emit("end", json!(null));
//!             result
//!         }));
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EngineError> {
//!     let engine = Engine::builder().devtools(true).build().await?;
//!     engine.register(Logger)?;
//!     engine.install("logger", None).await?;
//!     engine.run_with(terminal_fn(|_ctx| async { Ok(()) })).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: read engine settings from `ember.toml` (default)
//! - `json-log`: JSON log output

pub use ember_core as core;
pub use ember_framework as framework;
pub use ember_runtime as runtime;

pub use async_trait::async_trait;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use ember::prelude::*;
/// ```
pub mod prelude {
    // Engine - main entry point
    pub use ember_runtime::{Engine, EngineBuilder, EngineError, EngineResult, EngineSettings};

    // Plugins
    pub use ember_framework::{
        InstallReport, Plugin, PluginContext, PluginError, PluginInfo, PluginState,
    };

    // Middleware
    pub use ember_framework::{
        BoxError, Middleware, MiddlewareError, Next, Terminal, middleware_fn, terminal_fn,
    };

    // Context and configuration
    pub use ember_core::{
        CompositeConfigLoader, ConfigChange, ConfigError, ConfigLoader, ConfigObject,
        EngineContext, EnvironmentConfigLoader, JsonConfigLoader, LocalStorageConfigLoader,
        MemoryConfigLoader, Subscription,
    };

    // Diagnostics
    pub use ember_core::{DevToolsRecorder, DevToolsSnapshot};

    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
