//! Shared runtime context handed to plugins and middleware.
//!
//! [`EngineContext`] bundles three things:
//!
//! - a [`StateStore`]: string keys to JSON values, last write wins
//! - an [`EventBus`]: topic-based publish/subscribe
//! - the engine's [`ConfigManager`]
//!
//! One context exists per engine and is shared through an `Arc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::config::ConfigManager;
use crate::devtools::{Probe, RecordPayload, StateSource};
use crate::subscription::Subscription;

/// Topic that receives every emitted event.
pub const WILDCARD_TOPIC: &str = "*";

// =============================================================================
// StateStore
// =============================================================================

/// Flat key/value state shared across plugins.
pub struct StateStore {
    entries: RwLock<HashMap<String, Value>>,
    probe: Probe,
}

impl StateStore {
    fn new(probe: Probe) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            probe,
        }
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Deserializes the value stored under `key`.
    ///
    /// Returns `None` if the key is absent or the value has another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        let old = self.entries.write().insert(key.clone(), value.clone());
        trace!(key = %key, "State updated");
        self.probe.record_with(|| {
            RecordPayload::state_change(StateSource::State, key, old.clone(), Some(value))
        });
        old
    }

    /// Serializes and stores `value` under `key`.
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> serde_json::Result<Option<Value>> {
        Ok(self.set(key, serde_json::to_value(value)?))
    }

    /// Returns `true` if `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Removes `key`, returning its value.
    pub fn delete(&self, key: &str) -> Option<Value> {
        let old = self.entries.write().remove(key)?;
        self.probe.record_with(|| {
            RecordPayload::state_change(StateSource::State, key, Some(old.clone()), None)
        });
        Some(old)
    }

    /// Keys currently present, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// =============================================================================
// EventBus
// =============================================================================

/// Event subscriber: `(topic, payload)`.
pub type EventCallback = dyn Fn(&str, &Value) + Send + Sync;

struct Subscriber {
    id: u64,
    once: bool,
    callback: Arc<EventCallback>,
}

type TopicMap = HashMap<String, Vec<Subscriber>>;

/// Topic-based publish/subscribe.
///
/// Subscribers of a topic run in subscription order, followed by the
/// [`WILDCARD_TOPIC`] subscribers. Callbacks run synchronously inside
/// [`emit`](Self::emit) with no lock held, so they may emit or subscribe.
pub struct EventBus {
    topics: Arc<Mutex<TopicMap>>,
    next_id: AtomicU64,
    probe: Probe,
}

impl EventBus {
    fn new(probe: Probe) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            probe,
        }
    }

    fn subscribe<F>(&self, topic: String, once: bool, callback: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(topic.clone())
            .or_default()
            .push(Subscriber {
                id,
                once,
                callback: Arc::new(callback),
            });

        let topics: Weak<Mutex<TopicMap>> = Arc::downgrade(&self.topics);
        Subscription::new(id, move || {
            if let Some(topics) = topics.upgrade() {
                let mut topics = topics.lock();
                if let Some(subscribers) = topics.get_mut(&topic) {
                    subscribers.retain(|s| s.id != id);
                    if subscribers.is_empty() {
                        topics.remove(&topic);
                    }
                }
            }
        })
    }

    /// Subscribes to `topic`; use [`WILDCARD_TOPIC`] to receive every event.
    pub fn on<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.subscribe(topic.into(), false, callback)
    }

    /// Subscribes to the next emission on `topic` only.
    pub fn once<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.subscribe(topic.into(), true, callback)
    }

    /// Clears `topic`: removes every subscriber of it, including those other
    /// plugins registered, and returns how many were removed.
    ///
    /// To drop a single handler, call [`Subscription::unsubscribe`] on the
    /// handle returned by [`on`](Self::on).
    pub fn off(&self, topic: &str) -> usize {
        self.topics.lock().remove(topic).map_or(0, |s| s.len())
    }

    /// Number of subscribers registered for exactly `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    /// Delivers `payload` to the subscribers of `topic`, then to the wildcard
    /// subscribers. Returns the number of callbacks invoked.
    pub fn emit(&self, topic: &str, payload: Value) -> usize {
        let callbacks = {
            let mut topics = self.topics.lock();
            let mut callbacks = Vec::new();
            let mut take = |key: &str, topics: &mut TopicMap| {
                if let Some(subscribers) = topics.get_mut(key) {
                    callbacks.extend(subscribers.iter().map(|s| Arc::clone(&s.callback)));
                    subscribers.retain(|s| !s.once);
                    if subscribers.is_empty() {
                        topics.remove(key);
                    }
                }
            };
            take(topic, &mut topics);
            if topic != WILDCARD_TOPIC {
                take(WILDCARD_TOPIC, &mut topics);
            }
            callbacks
        };

        let delivered = callbacks.len();
        trace!(topic, listeners = delivered, "Emitting event");
        self.probe
            .record_with(|| RecordPayload::event(topic, payload.clone(), delivered));

        for callback in callbacks {
            callback(topic, &payload);
        }
        delivered
    }
}

// =============================================================================
// EngineContext
// =============================================================================

/// Shared mutable runtime state passed to plugins and middleware.
///
/// # Example
///
/// ```rust,ignore
/// let ctx = EngineContext::new(Arc::new(ConfigManager::new()));
/// ctx.events().on("user.login", |_, payload| println!("login: {payload}"));
/// ctx.state().set("user", json!("ann"));
/// ctx.events().emit("user.login", json!({"name": "ann"}));
/// ```
pub struct EngineContext {
    state: StateStore,
    events: EventBus,
    config: Arc<ConfigManager>,
    probe: Probe,
}

impl EngineContext {
    /// Creates a context without devtools instrumentation.
    pub fn new(config: Arc<ConfigManager>) -> Self {
        Self::with_probe(config, Probe::disabled())
    }

    /// Creates a context whose state and events are recorded via `probe`.
    pub fn with_probe(config: Arc<ConfigManager>, probe: Probe) -> Self {
        Self {
            state: StateStore::new(probe.clone()),
            events: EventBus::new(probe.clone()),
            config,
            probe,
        }
    }

    /// The shared state store.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// The event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The engine's configuration manager.
    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    /// The devtools probe shared by everything in this engine.
    pub fn probe(&self) -> &Probe {
        &self.probe
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("state_keys", &self.state.len())
            .field("config", &self.config)
            .field("probe", &self.probe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devtools::DevToolsRecorder;
    use serde_json::json;

    fn context() -> EngineContext {
        EngineContext::new(Arc::new(ConfigManager::new()))
    }

    #[test]
    fn test_state_last_write_wins() {
        let ctx = context();
        assert_eq!(ctx.state().set("count", json!(1)), None);
        assert_eq!(ctx.state().set("count", json!(2)), Some(json!(1)));
        assert_eq!(ctx.state().get_as::<u32>("count"), Some(2));
        assert!(ctx.state().has("count"));
        assert_eq!(ctx.state().delete("count"), Some(json!(2)));
        assert!(!ctx.state().has("count"));
        assert_eq!(ctx.state().delete("count"), None);
    }

    #[test]
    fn test_events_delivered_in_subscription_order_then_wildcard() {
        let ctx = context();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (topic, tag) in [("*", "wild"), ("ping", "first"), ("ping", "second")] {
            let log = Arc::clone(&log);
            let _sub = ctx.events().on(topic, move |t: &str, _: &Value| {
                log.lock().push(format!("{tag}:{t}"));
            });
        }

        assert_eq!(ctx.events().emit("ping", json!(null)), 3);
        assert_eq!(ctx.events().emit("other", json!(null)), 1);
        assert_eq!(
            *log.lock(),
            vec!["first:ping", "second:ping", "wild:ping", "wild:other"]
        );
    }

    #[test]
    fn test_once_and_off() {
        let ctx = context();
        let hits = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&hits);
        let _once = ctx.events().once("boot", move |_: &str, _: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ctx.events().emit("boot", json!(1));
        ctx.events().emit("boot", json!(2));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let _a = ctx.events().on("tick", |_: &str, _: &Value| {});
        let _b = ctx.events().on("tick", |_: &str, _: &Value| {});
        assert_eq!(ctx.events().off("tick"), 2);
        assert_eq!(ctx.events().emit("tick", json!(null)), 0);
    }

    #[test]
    fn test_unsubscribe_leaves_other_handlers() {
        let ctx = context();
        let mine = ctx.events().on("tick", |_: &str, _: &Value| {});
        let _theirs = ctx.events().on("tick", |_: &str, _: &Value| {});

        mine.unsubscribe();
        assert_eq!(ctx.events().listener_count("tick"), 1);
        assert_eq!(ctx.events().emit("tick", json!(null)), 1);
    }

    #[test]
    fn test_unsubscribe_and_reentrant_emit() {
        let ctx = Arc::new(context());
        let weak = Arc::downgrade(&ctx);
        let _relay = ctx.events().on("outer", move |_: &str, payload: &Value| {
            if let Some(ctx) = weak.upgrade() {
                ctx.events().emit("inner", payload.clone());
            }
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = ctx.events().on("inner", move |_: &str, payload: &Value| {
            seen_clone.lock().push(payload.clone());
        });

        ctx.events().emit("outer", json!("a"));
        sub.unsubscribe();
        ctx.events().emit("outer", json!("b"));

        assert_eq!(*seen.lock(), vec![json!("a")]);
        assert_eq!(ctx.events().listener_count("inner"), 0);
    }

    #[test]
    fn test_probe_records_state_and_events() {
        let recorder = Arc::new(DevToolsRecorder::new(8));
        let ctx = EngineContext::with_probe(
            Arc::new(ConfigManager::new()),
            Probe::new(Arc::clone(&recorder)),
        );
        ctx.state().set("user", json!("ann"));
        ctx.events().emit("login", json!({"user": "ann"}));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.state_changes[0].data.key, "user");
        assert_eq!(snapshot.state_changes[0].data.source, StateSource::State);
        assert_eq!(snapshot.events[0].data.topic, "login");
        assert_eq!(snapshot.events[0].data.listeners, 0);
    }
}
