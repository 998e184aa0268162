//! Engine composition.
//!
//! An [`Engine`] ties together the pieces of the runtime core:
//!
//! ```text
//!  ConfigLoader ─┐
//!  ConfigLoader ─┼─► ConfigManager ──► EngineContext ◄── PluginRegistry
//!  ConfigLoader ─┘                          ▲                 │
//!                                           │                 ▼
//!                                           └──────── MiddlewarePipeline
//!
//!  DevToolsRecorder ◄── every component, through one shared Probe
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ember_runtime::Engine;
//!
//! let engine = Engine::builder()
//!     .config_loader(JsonConfigLoader::from_file("app.json"), 0)
//!     .optional_config_loader(EnvironmentConfigLoader::new().prefix("APP_"), 10)
//!     .devtools(true)
//!     .build()
//!     .await?;
//!
//! engine.register(Logger)?;
//! engine.install_all().await;
//! engine.run_with(terminal_fn(|ctx| async move { Ok(()) })).await?;
//! engine.shutdown().await;
//! ```

use std::sync::Arc;

use ember_core::{
    ConfigChange, ConfigLoader, ConfigManager, DevToolsRecorder, DevToolsSnapshot, EngineContext,
    EventBus, Probe, StateStore, Subscription,
};
use ember_framework::{
    InstallReport, Middleware, MiddlewarePipeline, PipelineService, Plugin, PluginInfo,
    PluginRegistry, Terminal,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::logging;
use crate::settings::{EngineSettings, SettingsLoader};

/// The composed engine runtime.
pub struct Engine {
    settings: EngineSettings,
    recorder: Option<Arc<DevToolsRecorder>>,
    context: Arc<EngineContext>,
    registry: PluginRegistry,
    config_watch: Mutex<Option<Subscription>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Settings the engine was built with.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        self.context.config()
    }

    pub fn state(&self) -> &StateStore {
        self.context.state()
    }

    pub fn events(&self) -> &EventBus {
        self.context.events()
    }

    pub fn pipeline(&self) -> &Arc<MiddlewarePipeline> {
        self.registry.pipeline()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    // =========================================================================
    // Plugins
    // =========================================================================

    pub fn register<P: Plugin>(&self, plugin: P) -> EngineResult<()> {
        Ok(self.registry.register(plugin)?)
    }

    /// Installs `name` and its dependencies.
    pub async fn install(&self, name: &str, options: Option<Value>) -> EngineResult<()> {
        Ok(self.registry.install(name, options).await?)
    }

    /// Installs every registered plugin, collecting failures.
    pub async fn install_all(&self) -> InstallReport {
        self.registry.install_all().await
    }

    pub async fn uninstall(&self, name: &str) -> EngineResult<()> {
        Ok(self.registry.uninstall(name).await?)
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.registry.plugins()
    }

    // =========================================================================
    // Middleware
    // =========================================================================

    /// Adds middleware not owned by any plugin.
    pub fn use_middleware<M: Middleware>(&self, middleware: M) {
        self.pipeline().add(middleware);
    }

    /// Runs the pipeline against the engine context without a terminal.
    pub async fn run(&self) -> EngineResult<()> {
        Ok(self.pipeline().run(Arc::clone(&self.context)).await?)
    }

    /// Runs the pipeline against the engine context, ending in `terminal`.
    pub async fn run_with(&self, terminal: Terminal) -> EngineResult<()> {
        Ok(self
            .pipeline()
            .run_with(Arc::clone(&self.context), terminal)
            .await?)
    }

    /// The pipeline as a tower service taking the context as its request.
    pub fn service(&self) -> PipelineService {
        PipelineService::new(Arc::clone(self.pipeline()))
    }

    // =========================================================================
    // Configuration & diagnostics
    // =========================================================================

    /// Reloads every config loader and notifies watchers of changed keys.
    pub async fn reload_config(&self) -> EngineResult<Vec<ConfigChange>> {
        Ok(self.config().reload().await?)
    }

    /// The recorder, when devtools are enabled.
    pub fn devtools(&self) -> Option<&Arc<DevToolsRecorder>> {
        self.recorder.as_ref()
    }

    pub fn devtools_snapshot(&self) -> Option<DevToolsSnapshot> {
        self.recorder.as_ref().map(|r| r.snapshot())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops watching config sources and uninstalls every installed plugin,
    /// dependents first. Returns the uninstalled names in order.
    ///
    /// The engine stays usable; plugins can be installed again.
    pub async fn shutdown(&self) -> Vec<String> {
        if let Some(subscription) = self.config_watch.lock().take() {
            subscription.unsubscribe();
            debug!("Stopped watching config sources");
        }
        let uninstalled = self.registry.uninstall_all().await;
        info!(plugins = uninstalled.len(), "Engine shut down");
        uninstalled
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("registry", &self.registry)
            .field("devtools", &self.recorder.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// EngineBuilder
// =============================================================================

struct LoaderEntry {
    loader: Arc<dyn ConfigLoader>,
    priority: i32,
    optional: bool,
}

/// Builder for an [`Engine`].
///
/// Settings default to [`EngineSettings::default`]; use
/// [`load_settings`](Self::load_settings) to read them from files and the
/// environment.
pub struct EngineBuilder {
    settings: Option<EngineSettings>,
    settings_loader: Option<SettingsLoader>,
    loaders: Vec<LoaderEntry>,
    devtools: Option<bool>,
    recorder: Option<Arc<DevToolsRecorder>>,
    init_logging: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            settings: None,
            settings_loader: None,
            loaders: Vec::new(),
            devtools: None,
            recorder: None,
            init_logging: false,
        }
    }

    /// Uses these settings as is.
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Loads settings with a default [`SettingsLoader`].
    pub fn load_settings(self) -> Self {
        self.settings_loader(SettingsLoader::new())
    }

    pub fn settings_loader(mut self, loader: SettingsLoader) -> Self {
        self.settings_loader = Some(loader);
        self
    }

    /// Adds a required config loader. Higher priorities override lower ones.
    pub fn config_loader(self, loader: impl ConfigLoader + 'static, priority: i32) -> Self {
        self.shared_config_loader(Arc::new(loader), priority, false)
    }

    /// Adds a config loader whose failures are logged and skipped.
    pub fn optional_config_loader(self, loader: impl ConfigLoader + 'static, priority: i32) -> Self {
        self.shared_config_loader(Arc::new(loader), priority, true)
    }

    /// Adds a loader the caller keeps a handle to, e.g. to `set` values on a
    /// [`MemoryConfigLoader`](ember_core::MemoryConfigLoader) later.
    pub fn shared_config_loader(
        mut self,
        loader: Arc<dyn ConfigLoader>,
        priority: i32,
        optional: bool,
    ) -> Self {
        self.loaders.push(LoaderEntry {
            loader,
            priority,
            optional,
        });
        self
    }

    /// Overrides `devtools.enabled` from the settings.
    pub fn devtools(mut self, enabled: bool) -> Self {
        self.devtools = Some(enabled);
        self
    }

    /// Records into an existing recorder. Implies devtools enabled.
    pub fn devtools_recorder(mut self, recorder: Arc<DevToolsRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Installs the global log subscriber from the logging settings.
    pub fn with_logging(mut self) -> Self {
        self.init_logging = true;
        self
    }

    /// Loads settings and configuration and assembles the engine.
    ///
    /// # Errors
    ///
    /// Fails if settings cannot be loaded or a required config loader fails.
    pub async fn build(self) -> EngineResult<Engine> {
        let mut settings = match (self.settings, self.settings_loader) {
            (Some(settings), _) => settings,
            (None, Some(loader)) => loader.load()?,
            (None, None) => EngineSettings::default(),
        };
        if let Some(enabled) = self.devtools {
            settings.devtools.enabled = enabled;
        }

        if self.init_logging {
            logging::init_from_config(&settings.logging);
        }

        let recorder = match self.recorder {
            Some(recorder) => Some(recorder),
            None if settings.devtools.enabled => {
                Some(Arc::new(DevToolsRecorder::new(settings.devtools.capacity)))
            }
            None => None,
        };
        let probe = recorder
            .as_ref()
            .map(|r| Probe::new(Arc::clone(r)))
            .unwrap_or_default();

        let config = Arc::new(ConfigManager::with_probe(probe.clone()));
        for entry in self.loaders {
            if entry.optional {
                config.add_optional_loader(entry.loader, entry.priority);
            } else {
                config.add_loader(entry.loader, entry.priority);
            }
        }
        config.load().await?;

        let config_watch = settings
            .config
            .watch_sources
            .then(|| config.watch_loaders());

        let context = Arc::new(EngineContext::with_probe(config, probe.clone()));
        let pipeline = Arc::new(MiddlewarePipeline::with_probe(probe));
        let registry = PluginRegistry::new(context, pipeline)
            .idempotent_register(settings.plugins.idempotent_register);

        info!(
            devtools = recorder.is_some(),
            watch_sources = settings.config.watch_sources,
            log_level = %settings.logging.level,
            "Engine initialized"
        );

        Ok(Engine {
            settings,
            recorder,
            context: Arc::clone(registry.context()),
            registry,
            config_watch: Mutex::new(config_watch),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use async_trait::async_trait;
    use ember_core::{ConfigError, ConfigObject, JsonConfigLoader, MemoryConfigLoader};
    use ember_framework::{BoxError, PluginContext, PluginError, PluginState, terminal_fn};
    use serde::Deserialize;
    use serde_json::json;

    fn memory(value: Value) -> MemoryConfigLoader {
        MemoryConfigLoader::from_value(value).unwrap()
    }

    #[derive(Default, Deserialize)]
    struct CounterOptions {
        #[serde(default)]
        start: i64,
    }

    struct Counter;

    #[async_trait]
    impl Plugin for Counter {
        type Options = CounterOptions;

        fn name(&self) -> &str {
            "counter"
        }

        async fn install(&self, ctx: &PluginContext, options: CounterOptions) -> Result<(), BoxError> {
            ctx.state().set("count", json!(options.start));
            Ok(())
        }

        async fn uninstall(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.state().delete("count");
            Ok(())
        }
    }

    struct Reporter;

    #[async_trait]
    impl Plugin for Reporter {
        type Options = ();

        fn name(&self) -> &str {
            "reporter"
        }

        fn depends_on(&self) -> &[&str] {
            &["counter"]
        }

        async fn install(&self, _ctx: &PluginContext, _options: ()) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_build_merges_loaders_by_priority() {
        let engine = Engine::builder()
            .config_loader(JsonConfigLoader::inline(r#"{"b": 3, "c": 4}"#), 10)
            .config_loader(memory(json!({"a": 1, "b": 2})), 0)
            .build()
            .await
            .unwrap();

        let expected: ConfigObject = serde_json::from_value(json!({"a": 1, "b": 3, "c": 4})).unwrap();
        assert_eq!(engine.config().snapshot(), expected);
        assert!(engine.devtools().is_none());
    }

    #[tokio::test]
    async fn test_failing_required_loader_fails_build() {
        let result = Engine::builder()
            .config_loader(JsonConfigLoader::inline("{ not json"), 0)
            .build()
            .await;
        assert!(matches!(result, Err(EngineError::Config(ConfigError::Load { .. }))));

        let engine = Engine::builder()
            .optional_config_loader(JsonConfigLoader::inline("{ not json"), 0)
            .config_loader(memory(json!({"ok": true})), 1)
            .build()
            .await
            .unwrap();
        assert_eq!(engine.config().get("ok").unwrap(), json!(true));
    }

    #[tokio::test]
    async fn test_plugin_options_from_config() {
        let engine = Engine::builder()
            .config_loader(memory(json!({"plugins": {"counter": {"start": 7}}})), 0)
            .build()
            .await
            .unwrap();
        engine.register(Counter).unwrap();
        engine.register(Reporter).unwrap();

        assert!(engine.install_all().await.is_success());
        assert_eq!(engine.state().get("count"), Some(json!(7)));

        let order = engine.shutdown().await;
        assert_eq!(order, vec!["reporter", "counter"]);
        assert!(!engine.state().has("count"));
        assert!(engine.plugins().iter().all(|p| p.state == PluginState::Uninstalled));
    }

    #[tokio::test]
    async fn test_registration_policy_from_settings() {
        let mut settings = EngineSettings::default();
        settings.plugins.idempotent_register = true;
        let engine = Engine::builder().settings(settings).build().await.unwrap();
        engine.register(Counter).unwrap();
        engine.register(Counter).unwrap();

        let strict = Engine::builder().build().await.unwrap();
        strict.register(Counter).unwrap();
        assert!(matches!(
            strict.register(Counter),
            Err(EngineError::Plugin(PluginError::Duplicate(_)))
        ));
    }

    #[tokio::test]
    async fn test_devtools_records_engine_activity() {
        let engine = Engine::builder()
            .config_loader(memory(json!({"mode": "dev"})), 0)
            .devtools(true)
            .build()
            .await
            .unwrap();
        engine.register(Counter).unwrap();
        engine.install("counter", Some(json!({"start": 1}))).await.unwrap();
        engine.config().set("mode", json!("prod")).unwrap();
        engine
            .run_with(terminal_fn(|ctx: Arc<EngineContext>| async move {
                ctx.events().emit("handled", json!(null));
                Ok(())
            }))
            .await
            .unwrap();

        let snapshot = engine.devtools_snapshot().unwrap();
        assert_eq!(snapshot.plugins.len(), 2);
        assert_eq!(snapshot.event_payloads("handled").len(), 1);
        assert!(snapshot.state_changes.iter().any(|r| r.data.key == "mode"));
        assert!(snapshot.state_changes.iter().any(|r| r.data.key == "count"));
        assert!(!snapshot.performance.is_empty());
    }

    #[tokio::test]
    async fn test_memory_loader_updates_are_watched() {
        let source = Arc::new(memory(json!({"level": 1})));
        let mut settings = EngineSettings::default();
        settings.config.watch_sources = true;
        let engine = Engine::builder()
            .settings(settings)
            .shared_config_loader(source.clone(), 0, false)
            .build()
            .await
            .unwrap();

        source.set("level", json!(2)).unwrap();
        assert_eq!(engine.config().get("level").unwrap(), json!(2));

        engine.shutdown().await;
        source.set("level", json!(3)).unwrap();
        assert_eq!(engine.config().get("level").unwrap(), json!(2));
    }
}
