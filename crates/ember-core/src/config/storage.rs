//! Persistent key/value storage and the loader that reads configuration from it.
//!
//! A [`KeyValueStore`] is the engine's pluggable persistence abstraction:
//! string keys mapped to string values, optionally with change
//! notifications. Two stores ship with the core:
//!
//! | Store | Persistence | Notifications |
//! |-------|-------------|---------------|
//! | [`MemoryStore`] | process lifetime | yes |
//! | [`FileStore`] | one file per key in a directory | no |
//!
//! [`LocalStorageConfigLoader`] keeps a whole configuration document under a
//! single namespaced key.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::loader::{ConfigLoader, SourceCallback, parse_document};
use super::value::ConfigObject;
use crate::error::{ConfigError, ConfigResult};
use crate::subscription::{ListenerList, Subscription};

/// Default key under which [`LocalStorageConfigLoader`] stores its document.
pub const DEFAULT_STORAGE_KEY: &str = "ember:config";

/// Store change callback: `(key, new_value)`; `None` means the key was removed.
pub type StoreCallback = dyn Fn(&str, Option<&str>) + Send + Sync;

/// A persistent string key/value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a key; `Ok(None)` if absent.
    async fn get(&self, key: &str) -> ConfigResult<Option<String>>;

    /// Writes a key.
    async fn set(&self, key: &str, value: &str) -> ConfigResult<()>;

    /// Deletes a key. Deleting an absent key succeeds.
    async fn remove(&self, key: &str) -> ConfigResult<()>;

    /// Subscribes to changes made through this store.
    ///
    /// Returns `None` when the store has no native change notification.
    fn subscribe(&self, callback: Arc<StoreCallback>) -> Option<Subscription> {
        let _ = callback;
        None
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store with change notifications.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    listeners: ListenerList<StoreCallback>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, key: &str, value: Option<&str>) {
        for listener in self.listeners.snapshot() {
            listener(key, value);
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> ConfigResult<()> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        self.notify(key, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> ConfigResult<()> {
        let existed = self.entries.write().remove(key).is_some();
        if existed {
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self, callback: Arc<StoreCallback>) -> Option<Subscription> {
        Some(self.listeners.add(callback))
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// Directory-backed store: each key is one file.
///
/// Characters outside `[A-Za-z0-9._-]` in keys are replaced by `_` to form
/// the file name, so `ember:config` is stored as `ember_config.value`.
/// Writes go to a temporary file that is then renamed over the target, so a
/// cancelled or failed write never leaves a truncated value behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates a store under the user's data directory (`<data_dir>/<app>`).
    pub fn in_user_data_dir(app: &str) -> ConfigResult<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| ConfigError::storage("no user data directory on this platform"))?;
        Ok(Self::new(base.join(app)))
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.value"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> ConfigResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.path_for(key);
        let staging = target.with_extension("value.tmp");
        tokio::fs::write(&staging, value).await?;
        tokio::fs::rename(&staging, &target).await?;
        debug!(path = %target.display(), "Stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> ConfigResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// LocalStorageConfigLoader
// =============================================================================

/// Reads a configuration document stored under one key of a [`KeyValueStore`].
///
/// An absent key loads as an empty tree. [`watch`](ConfigLoader::watch) is
/// available exactly when the store supports notifications.
pub struct LocalStorageConfigLoader {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl LocalStorageConfigLoader {
    /// Creates a loader reading `key` from `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Creates a loader using [`DEFAULT_STORAGE_KEY`].
    pub fn with_default_key(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, DEFAULT_STORAGE_KEY)
    }

    /// The storage key this loader reads and writes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serializes `tree` and writes it under the loader's key.
    pub async fn save(&self, tree: &ConfigObject) -> ConfigResult<()> {
        let text = serde_json::to_string(tree).map_err(|source| ConfigError::Deserialize {
            key: self.key.clone(),
            source,
        })?;
        self.store.set(&self.key, &text).await
    }

    /// Removes the stored document.
    pub async fn clear(&self) -> ConfigResult<()> {
        self.store.remove(&self.key).await
    }

    fn origin(&self) -> String {
        format!("storage key '{}'", self.key)
    }
}

#[async_trait]
impl ConfigLoader for LocalStorageConfigLoader {
    fn name(&self) -> &str {
        "local-storage"
    }

    async fn load(&self) -> ConfigResult<ConfigObject> {
        match self.store.get(&self.key).await? {
            Some(text) => parse_document(&text, &self.origin()),
            None => Ok(ConfigObject::new()),
        }
    }

    fn watch(&self, callback: Arc<SourceCallback>) -> Option<Subscription> {
        let watched = self.key.clone();
        let origin = self.origin();
        self.store
            .subscribe(Arc::new(move |key: &str, value: Option<&str>| {
                if key != watched {
                    return;
                }
                match value.map(|text| parse_document(text, &origin)) {
                    Some(Ok(tree)) => callback(&tree),
                    Some(Err(e)) => {
                        warn!(key = %key, error = %e, "Ignoring unparsable stored configuration")
                    }
                    None => callback(&ConfigObject::new()),
                }
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_notifications() {
        let store = MemoryStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = store
            .subscribe(Arc::new(move |key: &str, value: Option<&str>| {
                seen_clone
                    .lock()
                    .push((key.to_string(), value.map(str::to_string)));
            }))
            .unwrap();

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        assert_eq!(
            *seen.lock(),
            vec![("k".to_string(), Some("v".to_string())), ("k".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_file_store_persists_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.get("ember:config").await.unwrap(), None);
        store.set("ember:config", r#"{"a":1}"#).await.unwrap();
        assert!(dir.path().join("nested/ember_config.value").exists());

        let reopened = FileStore::new(dir.path().join("nested"));
        assert_eq!(
            reopened.get("ember:config").await.unwrap().as_deref(),
            Some(r#"{"a":1}"#)
        );

        reopened.remove("ember:config").await.unwrap();
        reopened.remove("ember:config").await.unwrap();
        assert_eq!(reopened.get("ember:config").await.unwrap(), None);
        assert!(store.subscribe(Arc::new(|_: &str, _: Option<&str>| {})).is_none());
    }

    #[tokio::test]
    async fn test_local_storage_loader_absent_key_is_empty() {
        let loader = LocalStorageConfigLoader::with_default_key(Arc::new(MemoryStore::new()));
        assert!(loader.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_storage_loader_save_and_load() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let loader = LocalStorageConfigLoader::new(Arc::clone(&store), "app:settings");

        let Value::Object(tree) = json!({"locale": "en", "layout": {"compact": true}}) else {
            unreachable!()
        };
        loader.save(&tree).await.unwrap();

        assert_eq!(loader.load().await.unwrap(), tree);
        store.set("app:settings", "not json").await.unwrap();
        assert!(matches!(loader.load().await, Err(ConfigError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_local_storage_watch_filters_key() {
        let store = Arc::new(MemoryStore::new());
        let loader = LocalStorageConfigLoader::new(store.clone(), "cfg");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = loader
            .watch(Arc::new(move |tree: &ConfigObject| {
                seen_clone.lock().push(Value::Object(tree.clone()));
            }))
            .expect("memory store supports notifications");

        store.set("other", r#"{"x":1}"#).await.unwrap();
        store.set("cfg", r#"{"x":2}"#).await.unwrap();
        store.set("cfg", "garbage").await.unwrap();
        store.remove("cfg").await.unwrap();

        assert_eq!(*seen.lock(), vec![json!({"x": 2}), json!({})]);
    }

    #[test]
    fn test_local_storage_watch_unsupported_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let loader = LocalStorageConfigLoader::new(Arc::new(FileStore::new(dir.path())), "cfg");
        assert!(loader.watch(Arc::new(|_: &ConfigObject| {})).is_none());
    }
}
