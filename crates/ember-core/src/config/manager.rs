//! The layered configuration manager.
//!
//! [`ConfigManager`] owns the merged configuration tree of one engine. Loaders
//! are registered with a priority; [`load`](ConfigManager::load) runs them in
//! ascending priority (ties in registration order) and deep-merges their
//! output, so higher priorities win.
//!
//! # Change notification
//!
//! Every committed change is reported leaf by leaf as a [`ConfigChange`] to
//! the watchers whose prefix matches the changed key. Notifications are
//! delivered synchronously, in subscription order, after the write has been
//! committed and with no internal lock held. Writing a value equal to the
//! current one is a no-op and notifies nobody.
//!
//! | Operation | Notifies |
//! |-----------|----------|
//! | [`load`](ConfigManager::load) | no |
//! | [`reload`](ConfigManager::reload) | one change per differing leaf |
//! | [`set`](ConfigManager::set) / [`remove`](ConfigManager::remove) | one change per differing leaf |
//! | source push after [`watch_loaders`](ConfigManager::watch_loaders) | one change per differing leaf |
//!
//! # Runtime writes
//!
//! Values written with [`set`](ConfigManager::set) and
//! [`remove`](ConfigManager::remove) sit above every loader. They survive
//! [`load`](ConfigManager::load), [`reload`](ConfigManager::reload) and
//! source pushes until [`discard_overrides`](ConfigManager::discard_overrides)
//! drops them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::loader::{ConfigLoader, Layer, load_layers, merge_outputs};
use super::schema::{ConfigSchema, Violation};
use super::value::{self, ConfigChange, ConfigObject};
use crate::devtools::{Probe, RecordPayload, StateSource, Timing, TimingCategory};
use crate::error::{ConfigError, ConfigResult};
use crate::subscription::{ListenerList, Subscription};

/// Watcher callback.
pub type WatchCallback = dyn Fn(&ConfigChange) + Send + Sync;

/// A runtime write replayed on top of the merged loader output.
#[derive(Debug, Clone)]
enum Override {
    Set(String, Value),
    Remove(String),
}

impl Override {
    fn key(&self) -> &str {
        match self {
            Self::Set(key, _) | Self::Remove(key) => key,
        }
    }

    /// Applies the write. Returns `true` if a value was written or removed.
    fn apply(&self, tree: &mut ConfigObject) -> ConfigResult<bool> {
        match self {
            Self::Set(key, value) => value::set_path(tree, key, value.clone()).map(|_| true),
            Self::Remove(key) => Ok(value::remove_path(tree, key)?.is_some()),
        }
    }

    /// Returns `true` if this write is fully replaced by a later write to `key`.
    fn covered_by(&self, key: &str) -> bool {
        let own = self.key();
        own == key
            || (own.len() > key.len() && own.starts_with(key) && own.as_bytes()[key.len()] == b'.')
    }
}

fn apply_overrides(tree: &mut ConfigObject, overrides: &[Override]) {
    for write in overrides {
        if let Err(e) = write.apply(tree) {
            debug!(key = %write.key(), error = %e, "Skipping runtime write that no longer applies");
        }
    }
}

struct ManagedLayer {
    id: u64,
    priority: i32,
    layer: Layer,
}

/// Returns `true` if a watcher registered for `prefix` observes `key`.
fn prefix_matches(prefix: &str, key: &str) -> bool {
    if prefix.is_empty() || prefix == "*" {
        return true;
    }
    key == prefix
        || (key.len() > prefix.len()
            && key.starts_with(prefix)
            && key.as_bytes()[prefix.len()] == b'.')
}

/// Layered, observable configuration store.
pub struct ConfigManager {
    layers: RwLock<Vec<ManagedLayer>>,
    next_layer_id: AtomicU64,
    tree: RwLock<ConfigObject>,
    /// Per-layer output of the last successful load, keyed by layer id.
    outputs: Mutex<Vec<(u64, Option<ConfigObject>)>>,
    /// Runtime writes in order, at most one per key.
    overrides: Mutex<Vec<Override>>,
    watchers: ListenerList<WatchCallback>,
    probe: Probe,
}

impl ConfigManager {
    /// Creates a manager with no loaders and an empty tree.
    pub fn new() -> Self {
        Self::with_probe(Probe::disabled())
    }

    /// Creates a manager that records changes and load timings via `probe`.
    pub fn with_probe(probe: Probe) -> Self {
        Self {
            layers: RwLock::new(Vec::new()),
            next_layer_id: AtomicU64::new(1),
            tree: RwLock::new(ConfigObject::new()),
            outputs: Mutex::new(Vec::new()),
            overrides: Mutex::new(Vec::new()),
            watchers: ListenerList::new(),
            probe,
        }
    }

    /// Creates a manager whose tree starts as `initial`, with no loaders.
    pub fn from_object(initial: ConfigObject) -> Self {
        let manager = Self::new();
        *manager.tree.write() = initial;
        manager
    }

    // -------------------------------------------------------------------------
    // Loaders
    // -------------------------------------------------------------------------

    /// Registers a required loader. Higher priorities override lower ones.
    pub fn add_loader(&self, loader: Arc<dyn ConfigLoader>, priority: i32) {
        self.push_layer(loader, priority, false);
    }

    /// Registers a loader whose failures are logged and skipped.
    pub fn add_optional_loader(&self, loader: Arc<dyn ConfigLoader>, priority: i32) {
        self.push_layer(loader, priority, true);
    }

    fn push_layer(&self, loader: Arc<dyn ConfigLoader>, priority: i32, optional: bool) {
        let id = self.next_layer_id.fetch_add(1, Ordering::Relaxed);
        debug!(loader = %loader.name(), priority, optional, "Registered config loader");
        let mut layers = self.layers.write();
        layers.push(ManagedLayer {
            id,
            priority,
            layer: Layer { loader, optional },
        });
        // Stable sort: equal priorities keep registration order.
        layers.sort_by_key(|l| l.priority);
    }

    /// Names of the registered loaders in merge order.
    pub fn loader_names(&self) -> Vec<String> {
        self.layers
            .read()
            .iter()
            .map(|l| l.layer.loader.name().to_string())
            .collect()
    }

    async fn load_merged(&self) -> ConfigResult<(ConfigObject, Vec<(u64, Option<ConfigObject>)>)> {
        let (ids, layers): (Vec<u64>, Vec<Layer>) = self
            .layers
            .read()
            .iter()
            .map(|l| (l.id, l.layer.clone()))
            .unzip();

        let started = Instant::now();
        let result = load_layers(&layers).await;
        self.probe.record_with(|| {
            RecordPayload::Performance(Timing::new(
                "config.load",
                TimingCategory::ConfigLoad,
                started.elapsed(),
                result.is_ok(),
            ))
        });

        let outputs = result?;
        let merged = merge_outputs(&outputs);
        Ok((merged, ids.into_iter().zip(outputs).collect()))
    }

    /// Runs every loader and replaces the tree with the merged result.
    ///
    /// Does not notify watchers. On failure the previous tree is kept.
    pub async fn load(&self) -> ConfigResult<()> {
        let (merged, outputs) = self.load_merged().await?;
        let loaders = outputs.len();
        *self.outputs.lock() = outputs;
        self.replace_tree(merged);
        info!(loaders, keys = self.tree.read().len(), "Configuration loaded");
        Ok(())
    }

    /// Re-runs every loader, commits the result and notifies each changed leaf.
    ///
    /// Returns the changes. On failure the previous tree is kept and nothing
    /// is notified.
    pub async fn reload(&self) -> ConfigResult<Vec<ConfigChange>> {
        let (merged, outputs) = self.load_merged().await?;
        *self.outputs.lock() = outputs;
        let changes = self.replace_tree(merged);
        info!(changes = changes.len(), "Configuration reloaded");
        self.notify(&changes);
        Ok(changes)
    }

    /// Subscribes to every loader that can watch its source.
    ///
    /// When a source pushes a new tree, that loader's cached output is
    /// replaced, the tree is re-merged and the differing leaves are notified.
    /// Call after [`load`](Self::load); loaders added later are not watched.
    pub fn watch_loaders(self: &Arc<Self>) -> Subscription {
        let layers: Vec<(u64, Arc<dyn ConfigLoader>)> = self
            .layers
            .read()
            .iter()
            .map(|l| (l.id, Arc::clone(&l.layer.loader)))
            .collect();

        let subscriptions: Vec<Subscription> = layers
            .into_iter()
            .filter_map(|(id, loader)| {
                let manager: Weak<Self> = Arc::downgrade(self);
                let name = loader.name().to_string();
                let subscription = loader.watch(Arc::new(move |tree: &ConfigObject| {
                    if let Some(manager) = manager.upgrade() {
                        manager.apply_source_update(id, tree);
                    }
                }));
                if subscription.is_some() {
                    debug!(loader = %name, "Watching config loader");
                }
                subscription
            })
            .collect();

        Subscription::merge(subscriptions)
    }

    fn apply_source_update(&self, layer_id: u64, tree: &ConfigObject) {
        let merged = {
            let mut outputs = self.outputs.lock();
            let Some(slot) = outputs.iter_mut().find(|(id, _)| *id == layer_id) else {
                warn!(layer_id, "Ignoring update from a loader that was never loaded");
                return;
            };
            slot.1 = Some(tree.clone());
            merge_outputs(&outputs.iter().map(|(_, o)| o.clone()).collect::<Vec<_>>())
        };
        let changes = self.replace_tree(merged);
        debug!(changes = changes.len(), "Applied config source update");
        self.notify(&changes);
    }

    /// Drops every runtime write, so the tree reflects the loaders alone,
    /// and notifies the leaves that change.
    pub fn discard_overrides(&self) -> Vec<ConfigChange> {
        let merged = {
            let outputs = self.outputs.lock();
            merge_outputs(&outputs.iter().map(|(_, o)| o.clone()).collect::<Vec<_>>())
        };
        let changes = {
            let mut tree = self.tree.write();
            self.overrides.lock().clear();
            let changes = value::diff_trees(&tree, &merged);
            *tree = merged;
            changes
        };
        debug!(changes = changes.len(), "Discarded runtime config writes");
        self.notify(&changes);
        changes
    }

    /// Commits `merged` with the runtime writes on top and returns the diff.
    fn replace_tree(&self, mut merged: ConfigObject) -> Vec<ConfigChange> {
        let mut tree = self.tree.write();
        apply_overrides(&mut merged, &self.overrides.lock());
        let changes = value::diff_trees(&tree, &merged);
        *tree = merged;
        changes
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Returns the value at a dotted key.
    pub fn get(&self, key: &str) -> ConfigResult<Value> {
        value::get_path(&self.tree.read(), key)
            .cloned()
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))
    }

    /// Returns the value at `key`, or `default` if absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Deserializes the value at `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> ConfigResult<T> {
        let value = self.get(key)?;
        serde_json::from_value(value).map_err(|source| ConfigError::Deserialize {
            key: key.to_string(),
            source,
        })
    }

    /// Deserializes the value at `key`, falling back to `default` if it is
    /// absent or has the wrong shape.
    pub fn get_as_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get_as(key) {
            Ok(value) => value,
            Err(ConfigError::KeyNotFound(_)) => default,
            Err(e) => {
                warn!(key, error = %e, "Using default for malformed configuration value");
                default
            }
        }
    }

    /// Returns `true` if `key` resolves to a value.
    pub fn contains(&self, key: &str) -> bool {
        value::get_path(&self.tree.read(), key).is_some()
    }

    /// Returns a copy of the whole tree.
    pub fn snapshot(&self) -> ConfigObject {
        self.tree.read().clone()
    }

    /// Deserializes the whole tree.
    pub fn extract<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        serde_json::from_value(Value::Object(self.snapshot())).map_err(|source| {
            ConfigError::Deserialize {
                key: String::new(),
                source,
            }
        })
    }

    /// Validates the current tree against `schema`.
    pub fn validate(&self, schema: &ConfigSchema) -> Vec<Violation> {
        schema.validate(&self.tree.read())
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Writes `value` at `key`, creating intermediate objects, and notifies
    /// matching watchers of every changed leaf.
    ///
    /// The write stays above every loader; see [`discard_overrides`](Self::discard_overrides).
    pub fn set(&self, key: &str, new_value: Value) -> ConfigResult<()> {
        let (_, changes) = self.mutate(Override::Set(key.to_string(), new_value))?;
        if changes.is_empty() {
            debug!(key, "Config write left the value unchanged");
        }
        self.notify(&changes);
        Ok(())
    }

    /// Removes `key` and notifies matching watchers of every removed leaf.
    ///
    /// Returns `true` if the key existed. The removal also hides values a
    /// loader provides later.
    pub fn remove(&self, key: &str) -> ConfigResult<bool> {
        let (existed, changes) = self.mutate(Override::Remove(key.to_string()))?;
        self.notify(&changes);
        Ok(existed)
    }

    /// Applies `write`, keeps it as an override and diffs the top-level
    /// branch it touched.
    fn mutate(&self, write: Override) -> ConfigResult<(bool, Vec<ConfigChange>)> {
        let root = value::split_key(write.key())?[0].to_string();

        let mut tree = self.tree.write();
        let before = tree.get(&root).cloned();
        let applied = write.apply(&mut tree)?;
        let mut changes = Vec::new();
        value::diff_values(&root, before.as_ref(), tree.get(&root), &mut changes);

        let mut overrides = self.overrides.lock();
        overrides.retain(|o| !o.covered_by(write.key()));
        overrides.push(write);
        Ok((applied, changes))
    }

    // -------------------------------------------------------------------------
    // Watchers
    // -------------------------------------------------------------------------

    /// Subscribes `callback` to changes under `prefix`.
    ///
    /// `""` and `"*"` observe every key; otherwise a change matches when its
    /// key equals `prefix` or starts with `prefix.`.
    pub fn watch<F>(&self, prefix: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&ConfigChange) + Send + Sync + 'static,
    {
        let prefix = prefix.into();
        self.watchers.add(Arc::new(move |change: &ConfigChange| {
            if prefix_matches(&prefix, &change.key) {
                callback(change);
            }
        }))
    }

    /// Number of active watchers.
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    fn notify(&self, changes: &[ConfigChange]) {
        if changes.is_empty() {
            return;
        }
        for change in changes {
            self.probe.record_with(|| {
                RecordPayload::state_change(
                    StateSource::Config,
                    change.key.clone(),
                    change.old.clone(),
                    change.new.clone(),
                )
            });
        }

        let watchers = self.watchers.snapshot();
        for change in changes {
            for watcher in &watchers {
                watcher(change);
            }
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("loaders", &self.loader_names())
            .field("keys", &self.tree.read().len())
            .field("watchers", &self.watchers.len())
            .finish()
    }
}
