use std::sync::Arc;

use ember_core::{ConfigManager, EngineContext, EventBus, StateStore};

use crate::middleware::{Middleware, MiddlewarePipeline};

/// Handle given to a plugin's lifecycle hooks.
///
/// Gives access to the engine context and lets the plugin add middleware.
/// Middleware added here is attributed to the plugin and removed when the
/// plugin is uninstalled or its install fails.
pub struct PluginContext {
    plugin: String,
    engine: Arc<EngineContext>,
    pipeline: Arc<MiddlewarePipeline>,
}

impl PluginContext {
    pub(crate) fn new(
        plugin: impl Into<String>,
        engine: Arc<EngineContext>,
        pipeline: Arc<MiddlewarePipeline>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            engine,
            pipeline,
        }
    }

    /// Name of the plugin this context belongs to.
    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    /// The shared engine context.
    pub fn engine(&self) -> &Arc<EngineContext> {
        &self.engine
    }

    pub fn state(&self) -> &StateStore {
        self.engine.state()
    }

    pub fn events(&self) -> &EventBus {
        self.engine.events()
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        self.engine.config()
    }

    /// Adds a middleware owned by this plugin.
    pub fn add_middleware<M: Middleware>(&self, middleware: M) {
        self.pipeline.add_owned(Arc::new(middleware), &self.plugin);
    }

    /// Removes middleware by name, whoever added it.
    pub fn remove_middleware(&self, name: &str) -> bool {
        self.pipeline.remove(name)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}
