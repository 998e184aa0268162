//! End-to-end scenarios through the facade crate.

use std::sync::Arc;

use ember::core::{FileStore, KeyValueStore, MemoryStore};
use ember::prelude::*;
use parking_lot::Mutex;
use serde::Deserialize;

fn memory(value: Value) -> MemoryConfigLoader {
    MemoryConfigLoader::from_value(value).unwrap()
}

fn object(value: Value) -> ConfigObject {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

// =============================================================================
// Plugins used across scenarios
// =============================================================================

/// Wraps every run in `start` / `end` events.
struct Logger;

#[async_trait]
impl Plugin for Logger {
    type Options = ();

    fn name(&self) -> &str {
        "logger"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn install(&self, ctx: &PluginContext, _options: ()) -> Result<(), BoxError> {
        ctx.add_middleware(middleware_fn(
            "logger",
            100,
            |ctx: Arc<EngineContext>, next: Next| async move {
                ctx.events().emit("start", json!(null));
                let result = next.run(Arc::clone(&ctx)).await;
                ctx.events().emit("end", json!(null));
                result
            },
        ));
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct GreeterOptions {
    #[serde(default)]
    greeting: String,
}

struct Greeter;

#[async_trait]
impl Plugin for Greeter {
    type Options = GreeterOptions;

    fn name(&self) -> &str {
        "greeter"
    }

    fn depends_on(&self) -> &[&str] {
        &["logger"]
    }

    async fn install(&self, ctx: &PluginContext, options: GreeterOptions) -> Result<(), BoxError> {
        ctx.state().set("greeting", json!(options.greeting));
        Ok(())
    }
}

/// Registers middleware, then fails.
struct Broken;

#[async_trait]
impl Plugin for Broken {
    type Options = ();

    fn name(&self) -> &str {
        "broken"
    }

    async fn install(&self, ctx: &PluginContext, _options: ()) -> Result<(), BoxError> {
        ctx.add_middleware(middleware_fn(
            "broken-guard",
            500,
            |_ctx: Arc<EngineContext>, _next: Next| async move { Err::<(), BoxError>("blocked".into()) },
        ));
        Err("database unreachable".into())
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_memory_and_json_loaders_merge() {
    let engine = Engine::builder()
        .config_loader(memory(json!({"a": 1, "b": 2})), 0)
        .config_loader(JsonConfigLoader::inline(r#"{"b": 3, "c": 4}"#), 1)
        .build()
        .await
        .unwrap();

    assert_eq!(engine.config().snapshot(), object(json!({"a": 1, "b": 3, "c": 4})));
}

#[tokio::test]
async fn test_logger_plugin_records_start_and_end() {
    let engine = Engine::builder().devtools(true).build().await.unwrap();
    engine.register(Logger).unwrap();
    engine.install("logger", None).await.unwrap();

    let handled = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&handled);
    engine
        .run_with(terminal_fn(move |_ctx: Arc<EngineContext>| {
            let flag = Arc::clone(&flag);
            async move {
                *flag.lock() = true;
                Ok(())
            }
        }))
        .await
        .unwrap();

    assert!(*handled.lock());
    let snapshot = engine.devtools_snapshot().unwrap();
    let topics: Vec<&str> = snapshot.events.iter().map(|r| r.data.topic.as_str()).collect();
    assert_eq!(topics, vec!["start", "end"]);
}

#[tokio::test]
async fn test_onion_order() {
    let engine = Engine::builder().build().await.unwrap();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::default();

    for (name, priority) in [("B", 5), ("A", 10)] {
        let log = Arc::clone(&log);
        engine.use_middleware(middleware_fn(
            name,
            priority,
            move |ctx: Arc<EngineContext>, next: Next| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(if name == "A" { "A-before" } else { "B-before" });
                    let result = next.run(ctx).await;
                    log.lock().push(if name == "A" { "A-after" } else { "B-after" });
                    result
                }
            },
        ));
    }

    engine.run().await.unwrap();
    assert_eq!(*log.lock(), vec!["A-before", "B-before", "B-after", "A-after"]);
}

#[tokio::test]
async fn test_dependencies_install_first_with_config_options() {
    let engine = Engine::builder()
        .config_loader(memory(json!({"plugins": {"greeter": {"greeting": "hello"}}})), 0)
        .devtools(true)
        .build()
        .await
        .unwrap();
    engine.register(Greeter).unwrap();
    engine.register(Logger).unwrap();

    engine.install("greeter", None).await.unwrap();
    assert_eq!(engine.state().get("greeting"), Some(json!("hello")));

    let installs: Vec<String> = engine
        .devtools_snapshot()
        .unwrap()
        .plugins
        .iter()
        .filter(|r| r.data.action == ember::core::PluginAction::Installed)
        .map(|r| r.data.plugin.clone())
        .collect();
    assert_eq!(installs, vec!["logger", "greeter"]);

    assert!(matches!(
        engine.uninstall("logger").await,
        Err(EngineError::Plugin(PluginError::DependentPlugin { .. }))
    ));
    assert_eq!(engine.shutdown().await, vec!["greeter", "logger"]);
}

#[tokio::test]
async fn test_failed_plugin_is_isolated() {
    let engine = Engine::builder().devtools(true).build().await.unwrap();
    engine.register(Logger).unwrap();
    engine.register(Broken).unwrap();

    let report = engine.install_all().await;
    assert_eq!(report.installed, vec!["logger"]);
    assert!(matches!(report.failure("broken"), Some(PluginError::Install { .. })));
    assert_eq!(engine.registry().state("broken"), Some(PluginState::Failed));

    // The failed plugin's middleware is gone, so the chain still completes.
    assert_eq!(engine.pipeline().names(), vec!["logger"]);
    tokio_test::assert_ok!(engine.run().await);

    let failure = engine
        .devtools_snapshot()
        .unwrap()
        .plugins
        .iter()
        .find(|r| r.data.plugin == "broken" && r.data.error.is_some())
        .map(|r| r.data.error.clone().unwrap_or_default());
    assert!(failure.unwrap().contains("database unreachable"));
}

#[tokio::test]
async fn test_watchers_see_each_change_once() {
    let engine = Engine::builder()
        .config_loader(memory(json!({"server": {"port": 80}})), 0)
        .build()
        .await
        .unwrap();

    let seen: Arc<Mutex<Vec<ConfigChange>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let subscription = engine.config().watch("server", move |change: &ConfigChange| {
        sink.lock().push(change.clone());
    });

    engine.config().set("server.port", json!(8080)).unwrap();
    engine.config().set("server.port", json!(8080)).unwrap();
    engine.config().set("client.port", json!(1)).unwrap();

    {
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, "server.port");
        assert_eq!(seen[0].old, Some(json!(80)));
        assert_eq!(seen[0].new, Some(json!(8080)));
    }

    subscription.unsubscribe();
    engine.config().set("server.port", json!(9090)).unwrap();
    assert_eq!(seen.lock().len(), 1);
}

#[tokio::test]
async fn test_recorder_keeps_newest_records() {
    let recorder = Arc::new(DevToolsRecorder::new(3));
    let engine = Engine::builder()
        .devtools_recorder(Arc::clone(&recorder))
        .build()
        .await
        .unwrap();

    for i in 0..5 {
        engine.events().emit("tick", json!(i));
    }

    let snapshot = recorder.snapshot();
    let payloads: Vec<&Value> = snapshot.event_payloads("tick");
    assert_eq!(payloads, vec![&json!(2), &json!(3), &json!(4)]);
    assert_eq!(snapshot.events.first().map(|r| r.seq), Some(3));
}

#[tokio::test]
async fn test_stored_configuration_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(dir.path()));

    LocalStorageConfigLoader::with_default_key(Arc::clone(&store))
        .save(&object(json!({"theme": "dark", "volume": 3})))
        .await
        .unwrap();

    let engine = Engine::builder()
        .config_loader(memory(json!({"theme": "light", "lang": "en"})), 0)
        .config_loader(LocalStorageConfigLoader::with_default_key(store), 10)
        .build()
        .await
        .unwrap();

    assert_eq!(
        engine.config().snapshot(),
        object(json!({"theme": "dark", "lang": "en", "volume": 3}))
    );
}

#[tokio::test]
async fn test_store_notifications_reach_watchers() {
    let store = Arc::new(MemoryStore::new());
    let mut settings = EngineSettings::default();
    settings.config.watch_sources = true;

    let engine = Engine::builder()
        .settings(settings)
        .config_loader(LocalStorageConfigLoader::new(store.clone(), "app"), 0)
        .build()
        .await
        .unwrap();

    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let _watch = engine
        .config()
        .watch("", move |change: &ConfigChange| sink.lock().push(change.key.clone()));

    store.set("app", r#"{"feature": {"beta": true}}"#).await.unwrap();

    assert_eq!(engine.config().get("feature.beta").unwrap(), json!(true));
    assert_eq!(*seen.lock(), vec!["feature.beta"]);
}
