//! Configuration sources.
//!
//! Every source implements [`ConfigLoader`]:
//!
//! - [`MemoryConfigLoader`]: a caller-supplied tree, mutable through
//!   [`set`](MemoryConfigLoader::set)
//! - [`EnvironmentConfigLoader`]: process environment (or an explicit list of
//!   pairs) with prefix filtering, `__` nesting and type coercion
//! - [`JsonConfigLoader`]: a JSON document from a file or a string
//! - [`LocalStorageConfigLoader`](super::storage::LocalStorageConfigLoader):
//!   one document stored under a key in a [`KeyValueStore`](super::storage::KeyValueStore)
//! - [`CompositeConfigLoader`]: an ordered stack of the above
//!
//! # Layering
//!
//! Later layers override earlier ones using deep-merge semantics: nested
//! objects merge recursively, scalars and arrays are replaced wholesale.
//!
//! ```rust,ignore
//! use ember_core::config::{CompositeConfigLoader, EnvironmentConfigLoader, JsonConfigLoader};
//!
//! let loader = CompositeConfigLoader::new()
//!     .with(JsonConfigLoader::from_file("ember.json"))
//!     .with_optional(JsonConfigLoader::from_file("ember.local.json"))
//!     .with(EnvironmentConfigLoader::new().prefix("EMBER_"));
//! let tree = loader.load().await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::value::{self, ConfigObject};
use crate::error::{ConfigError, ConfigResult};
use crate::subscription::{ListenerList, Subscription};

/// Callback invoked by a watching source with its complete new output.
pub type SourceCallback = dyn Fn(&ConfigObject) + Send + Sync;

/// A source capable of producing, and optionally watching, a configuration tree.
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// Name used in logs and in [`ConfigError::Load`].
    fn name(&self) -> &str;

    /// Produces the source's current tree.
    async fn load(&self) -> ConfigResult<ConfigObject>;

    /// Subscribes to changes of the source.
    ///
    /// Returns `None` when the source cannot notify (the default).
    fn watch(&self, callback: Arc<SourceCallback>) -> Option<Subscription> {
        let _ = callback;
        None
    }
}

/// Parses `text` as a JSON document whose root must be an object.
pub fn parse_document(text: &str, origin: &str) -> ConfigResult<ConfigObject> {
    let parsed: Value = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        origin: origin.to_string(),
        source,
    })?;
    match parsed {
        Value::Object(map) => Ok(map),
        other => Err(ConfigError::NotAnObject(value::kind_name(&other))),
    }
}

// =============================================================================
// Layer loading (shared by the composite loader and the manager)
// =============================================================================

/// A loader together with its failure policy.
#[derive(Clone)]
pub(crate) struct Layer {
    pub(crate) loader: Arc<dyn ConfigLoader>,
    pub(crate) optional: bool,
}

/// Loads every layer in order.
///
/// Returns the per-layer output (`None` for a skipped optional layer). The
/// first required failure aborts with [`ConfigError::Load`].
pub(crate) async fn load_layers(layers: &[Layer]) -> ConfigResult<Vec<Option<ConfigObject>>> {
    let mut outputs = Vec::with_capacity(layers.len());
    for layer in layers {
        let name = layer.loader.name().to_string();
        match layer.loader.load().await {
            Ok(tree) => {
                trace!(loader = %name, keys = tree.len(), "Loader produced configuration");
                outputs.push(Some(tree));
            }
            Err(e) if layer.optional => {
                warn!(loader = %name, error = %e, "Optional config loader failed, skipping");
                outputs.push(None);
            }
            Err(e) => return Err(ConfigError::load(name, e)),
        }
    }
    Ok(outputs)
}

/// Merges cached per-layer outputs in order.
pub(crate) fn merge_outputs(outputs: &[Option<ConfigObject>]) -> ConfigObject {
    value::merge_all(outputs.iter().flatten().cloned())
}

// =============================================================================
// MemoryConfigLoader
// =============================================================================

/// Wraps a caller-supplied tree. `load()` never fails.
///
/// [`set`](Self::set) is the only loader-level mutation path; it notifies the
/// loader's watchers, so a manager that called
/// [`watch_loaders`](super::ConfigManager::watch_loaders) picks changes up
/// immediately. Mostly used for defaults and tests.
pub struct MemoryConfigLoader {
    name: String,
    data: RwLock<ConfigObject>,
    watchers: ListenerList<SourceCallback>,
}

impl MemoryConfigLoader {
    /// Creates a loader over `data`.
    pub fn new(data: ConfigObject) -> Self {
        Self {
            name: "memory".to_string(),
            data: RwLock::new(data),
            watchers: ListenerList::new(),
        }
    }

    /// Creates a loader from a JSON value, which must be an object.
    pub fn from_value(data: Value) -> ConfigResult<Self> {
        match data {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(ConfigError::NotAnObject(value::kind_name(&other))),
        }
    }

    /// Overrides the loader name used in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Writes `value` at a dotted key and notifies watchers.
    pub fn set(&self, key: &str, value: Value) -> ConfigResult<Option<Value>> {
        let (old, snapshot) = {
            let mut data = self.data.write();
            let old = value::set_path(&mut data, key, value)?;
            (old, data.clone())
        };
        for watcher in self.watchers.snapshot() {
            watcher(&snapshot);
        }
        Ok(old)
    }

    /// Returns a copy of the wrapped tree.
    pub fn snapshot(&self) -> ConfigObject {
        self.data.read().clone()
    }
}

impl Default for MemoryConfigLoader {
    fn default() -> Self {
        Self::new(ConfigObject::new())
    }
}

#[async_trait]
impl ConfigLoader for MemoryConfigLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> ConfigResult<ConfigObject> {
        Ok(self.snapshot())
    }

    fn watch(&self, callback: Arc<SourceCallback>) -> Option<Subscription> {
        Some(self.watchers.add(callback))
    }
}

// =============================================================================
// EnvironmentConfigLoader
// =============================================================================

#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Vars(Vec<(String, String)>),
}

/// Reads string key/value pairs and coerces them into typed values.
///
/// # Key mapping
///
/// With the defaults (`prefix("EMBER_")`, separator `__`, lower-casing):
///
/// - `EMBER_DEBUG=true` → `debug = true`
/// - `EMBER_SERVER__PORT=8080` → `server.port = 8080`
/// - `EMBER_THEME__ACCENT=#ff0` → `theme.accent = "#ff0"`
///
/// Variables not starting with the prefix are ignored.
#[derive(Debug, Clone)]
pub struct EnvironmentConfigLoader {
    source: EnvSource,
    prefix: Option<String>,
    strip_prefix: bool,
    separator: Option<String>,
    lowercase: bool,
}

impl EnvironmentConfigLoader {
    /// Reads from the process environment.
    pub fn new() -> Self {
        Self {
            source: EnvSource::Process,
            prefix: None,
            strip_prefix: true,
            separator: Some("__".to_string()),
            lowercase: true,
        }
    }

    /// Reads from an explicit list of pairs instead of the process.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            source: EnvSource::Vars(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            ..Self::new()
        }
    }

    /// Only keep variables starting with `prefix`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Keep the prefix in the resulting keys (it is stripped by default).
    pub fn keep_prefix(mut self) -> Self {
        self.strip_prefix = false;
        self
    }

    /// Sets the nesting separator (default `__`).
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = Some(separator.into());
        self
    }

    /// Disables nesting: every variable becomes a top-level key.
    pub fn flat(mut self) -> Self {
        self.separator = None;
        self
    }

    /// Keep key case as-is (keys are lower-cased by default).
    pub fn preserve_case(mut self) -> Self {
        self.lowercase = false;
        self
    }

    fn vars(&self) -> Vec<(String, String)> {
        let mut vars = match &self.source {
            EnvSource::Process => std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
            EnvSource::Vars(vars) => vars.clone(),
        };
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }

    fn map_key(&self, raw: &str) -> Option<String> {
        let key = match &self.prefix {
            Some(prefix) => {
                let rest = raw.strip_prefix(prefix.as_str())?;
                if self.strip_prefix { rest } else { raw }
            }
            None => raw,
        };
        if key.is_empty() {
            return None;
        }
        let key = if self.lowercase {
            key.to_lowercase()
        } else {
            key.to_string()
        };
        match &self.separator {
            Some(sep) => {
                let segments: Vec<&str> = key.split(sep.as_str()).collect();
                if segments.iter().any(|s| s.is_empty() || s.contains('.')) {
                    return None;
                }
                Some(segments.join("."))
            }
            None if key.contains('.') => None,
            None => Some(key),
        }
    }
}

impl Default for EnvironmentConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort coercion of an environment string.
///
/// `"true"`/`"false"` become booleans, integers and finite floats become
/// numbers, anything else stays a string.
pub fn coerce_env_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = raw.parse::<f64>()
        && float.is_finite()
        && let Some(number) = serde_json::Number::from_f64(float)
    {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}

#[async_trait]
impl ConfigLoader for EnvironmentConfigLoader {
    fn name(&self) -> &str {
        "environment"
    }

    async fn load(&self) -> ConfigResult<ConfigObject> {
        let mut tree = ConfigObject::new();
        for (raw_key, raw_value) in self.vars() {
            match self.map_key(&raw_key) {
                Some(key) => {
                    value::set_path(&mut tree, &key, coerce_env_value(&raw_value))?;
                }
                None if self.prefix.is_none() => {
                    trace!(variable = %raw_key, "Skipping variable with unmappable key");
                }
                None => {}
            }
        }
        debug!(keys = tree.len(), "Environment configuration loaded");
        Ok(tree)
    }
}

// =============================================================================
// JsonConfigLoader
// =============================================================================

#[derive(Debug, Clone)]
enum JsonSource {
    File(PathBuf),
    Inline(String),
}

/// Parses a JSON document from a file or from a string.
#[derive(Debug, Clone)]
pub struct JsonConfigLoader {
    source: JsonSource,
}

impl JsonConfigLoader {
    /// Reads the document from `path` on every load.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: JsonSource::File(path.into()),
        }
    }

    /// Parses `document` on every load.
    pub fn inline(document: impl Into<String>) -> Self {
        Self {
            source: JsonSource::Inline(document.into()),
        }
    }
}

#[async_trait]
impl ConfigLoader for JsonConfigLoader {
    fn name(&self) -> &str {
        match self.source {
            JsonSource::File(_) => "json-file",
            JsonSource::Inline(_) => "json",
        }
    }

    async fn load(&self) -> ConfigResult<ConfigObject> {
        match &self.source {
            JsonSource::File(path) => {
                debug!(path = %path.display(), "Loading JSON configuration file");
                let text = tokio::fs::read_to_string(path).await?;
                parse_document(&text, &path.display().to_string())
            }
            JsonSource::Inline(text) => parse_document(text, "<inline>"),
        }
    }
}

// =============================================================================
// CompositeConfigLoader
// =============================================================================

/// An ordered stack of loaders merged with later entries taking precedence.
///
/// Each entry is either required ([`with`](Self::with)) or optional
/// ([`with_optional`](Self::with_optional)). An optional entry that fails is
/// skipped; a required one aborts the whole load.
pub struct CompositeConfigLoader {
    name: String,
    layers: Vec<Layer>,
    outputs: Arc<Mutex<Vec<Option<ConfigObject>>>>,
}

impl CompositeConfigLoader {
    /// Creates an empty composite.
    pub fn new() -> Self {
        Self {
            name: "composite".to_string(),
            layers: Vec::new(),
            outputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Overrides the loader name used in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends a required loader.
    pub fn with(self, loader: impl ConfigLoader + 'static) -> Self {
        self.push(Arc::new(loader), false)
    }

    /// Appends an optional loader.
    pub fn with_optional(self, loader: impl ConfigLoader + 'static) -> Self {
        self.push(Arc::new(loader), true)
    }

    /// Appends an already shared loader.
    pub fn push(mut self, loader: Arc<dyn ConfigLoader>, optional: bool) -> Self {
        self.layers.push(Layer { loader, optional });
        self
    }

    /// Number of wrapped loaders.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if no loader was added.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Default for CompositeConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigLoader for CompositeConfigLoader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> ConfigResult<ConfigObject> {
        let outputs = load_layers(&self.layers).await?;
        let merged = merge_outputs(&outputs);
        *self.outputs.lock() = outputs;
        Ok(merged)
    }

    /// Watches every child that supports it; a child change re-merges the
    /// cached outputs of the last successful load.
    fn watch(&self, callback: Arc<SourceCallback>) -> Option<Subscription> {
        let subscriptions: Vec<Subscription> = self
            .layers
            .iter()
            .enumerate()
            .filter_map(|(index, layer)| {
                let outputs = Arc::clone(&self.outputs);
                let callback = Arc::clone(&callback);
                layer.loader.watch(Arc::new(move |tree: &ConfigObject| {
                    let merged = {
                        let mut outputs = outputs.lock();
                        if outputs.len() <= index {
                            outputs.resize(index + 1, None);
                        }
                        outputs[index] = Some(tree.clone());
                        merge_outputs(&outputs)
                    };
                    callback(&merged);
                }))
            })
            .collect();

        if subscriptions.is_empty() {
            None
        } else {
            Some(Subscription::merge(subscriptions))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    struct FailingLoader;

    #[async_trait]
    impl ConfigLoader for FailingLoader {
        fn name(&self) -> &str {
            "failing"
        }

        async fn load(&self) -> ConfigResult<ConfigObject> {
            Err(ConfigError::storage("backend offline"))
        }
    }

    fn memory(value: Value) -> MemoryConfigLoader {
        MemoryConfigLoader::from_value(value).unwrap()
    }

    #[test]
    fn test_coerce_env_value() {
        assert_eq!(coerce_env_value("true"), json!(true));
        assert_eq!(coerce_env_value("false"), json!(false));
        assert_eq!(coerce_env_value("42"), json!(42));
        assert_eq!(coerce_env_value("-7"), json!(-7));
        assert_eq!(coerce_env_value("2.5"), json!(2.5));
        assert_eq!(coerce_env_value("NaN"), json!("NaN"));
        assert_eq!(coerce_env_value("TRUE"), json!("TRUE"));
        assert_eq!(coerce_env_value("hello"), json!("hello"));
    }

    #[tokio::test]
    async fn test_env_prefix_filter_and_nesting() {
        let loader = EnvironmentConfigLoader::from_vars([
            ("EMBER_SERVER__PORT", "8080"),
            ("EMBER_DEBUG", "true"),
            ("EMBER_NAME", "demo"),
            ("PATH", "/usr/bin"),
        ])
        .prefix("EMBER_");

        let tree = loader.load().await.unwrap();
        assert_eq!(
            Value::Object(tree),
            json!({"debug": true, "name": "demo", "server": {"port": 8080}})
        );
    }

    #[tokio::test]
    async fn test_env_keep_prefix_and_flat() {
        let loader = EnvironmentConfigLoader::from_vars([("APP_MODE", "fast")])
            .prefix("APP_")
            .keep_prefix()
            .flat()
            .preserve_case();

        let tree = loader.load().await.unwrap();
        assert_eq!(Value::Object(tree), json!({"APP_MODE": "fast"}));
    }

    #[tokio::test]
    async fn test_json_inline_and_malformed() {
        let ok = JsonConfigLoader::inline(r#"{"b": 3, "c": 4}"#);
        assert_eq!(Value::Object(ok.load().await.unwrap()), json!({"b": 3, "c": 4}));

        let bad = JsonConfigLoader::inline("{not json");
        assert!(matches!(bad.load().await, Err(ConfigError::Parse { .. })));

        let array = JsonConfigLoader::inline("[1, 2]");
        assert!(matches!(array.load().await, Err(ConfigError::NotAnObject("array"))));
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"theme": {{"dark": true}}}}"#).unwrap();

        let loader = JsonConfigLoader::from_file(file.path());
        let tree = assert_ok!(loader.load().await);
        assert_eq!(Value::Object(tree), json!({"theme": {"dark": true}}));

        let missing = JsonConfigLoader::from_file(file.path().with_extension("missing"));
        assert!(matches!(missing.load().await, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_composite_merges_in_order() {
        let composite = CompositeConfigLoader::new()
            .with(memory(json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 1}})))
            .with(JsonConfigLoader::inline(r#"{"b": 3, "c": 4, "nested": {"y": 2}}"#));

        let tree = composite.load().await.unwrap();
        assert_eq!(
            Value::Object(tree),
            json!({"a": 1, "b": 3, "nested": {"x": 1, "y": 2}, "c": 4})
        );
    }

    #[tokio::test]
    async fn test_composite_optional_failure_is_skipped() {
        let composite = CompositeConfigLoader::new()
            .with(memory(json!({"a": 1})))
            .with_optional(FailingLoader);

        let tree = assert_ok!(composite.load().await);
        assert_eq!(Value::Object(tree), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_composite_required_failure_aborts() {
        let composite = CompositeConfigLoader::new()
            .with(memory(json!({"a": 1})))
            .with(FailingLoader);

        let err = assert_err!(composite.load().await);
        match err {
            ConfigError::Load { loader, .. } => assert_eq!(loader, "failing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_composite_watch_remerges_child_change() {
        let defaults = Arc::new(memory(json!({"a": 1, "b": 1})));
        let composite = CompositeConfigLoader::new()
            .push(defaults.clone(), false)
            .with(JsonConfigLoader::inline(r#"{"b": 2}"#));
        composite.load().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let subscription = composite
            .watch(Arc::new(move |tree: &ConfigObject| {
                seen_clone.lock().push(Value::Object(tree.clone()));
            }))
            .expect("memory child supports watch");

        defaults.set("a", json!(10)).unwrap();
        defaults.set("b", json!(10)).unwrap();
        subscription.unsubscribe();
        defaults.set("a", json!(99)).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![json!({"a": 10, "b": 2}), json!({"a": 10, "b": 2})]
        );
    }

    #[test]
    fn test_watch_unsupported_by_default() {
        let loader = JsonConfigLoader::inline("{}");
        assert!(loader.watch(Arc::new(|_: &ConfigObject| {})).is_none());
    }
}
