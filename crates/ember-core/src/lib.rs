//! # Ember Core
//!
//! Foundation types of the Ember engine runtime.
//!
//! This crate has no notion of plugins or middleware; it provides the shared
//! state those build on:
//!
//! - **Configuration**: [`ConfigLoader`] sources merged by a [`ConfigManager`]
//!   into one observable tree
//! - **Context**: [`EngineContext`] with its [`StateStore`] and [`EventBus`]
//! - **DevTools**: the [`DevToolsRecorder`] and the [`Probe`] handle every
//!   instrumented component holds
//!
//! ## Data Flow
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌───────────────┐
//! │  Loaders    │────▶│ ConfigManager │────▶│ EngineContext │
//! │ (memory,    │     │ (merged tree, │     │ (state, events│
//! │  env, json) │     │  watchers)    │     │  config)      │
//! └─────────────┘     └───────┬───────┘     └───────┬───────┘
//!                             │    Probe            │
//!                             └──────▶ DevTools ◀───┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_core::{ConfigManager, JsonConfigLoader, MemoryConfigLoader};
//! use std::sync::Arc;
//!
//! let config = ConfigManager::new();
//! config.add_loader(Arc::new(MemoryConfigLoader::from_value(json!({"a": 1, "b": 2}))?), 0);
//! config.add_loader(Arc::new(JsonConfigLoader::inline(r#"{"b":3,"c":4}"#)), 1);
//! config.load().await?;
//! assert_eq!(config.get("b")?, json!(3));
//! ```

pub mod config;
pub mod context;
pub mod devtools;
pub mod error;
pub mod subscription;

pub use config::{
    CompositeConfigLoader, ConfigChange, ConfigLoader, ConfigManager, ConfigObject, ConfigSchema,
    EnvironmentConfigLoader, FieldRule, FileStore, JsonConfigLoader, KeyValueStore,
    LocalStorageConfigLoader, MemoryConfigLoader, MemoryStore, ValueKind, Violation,
};
pub use context::{EngineContext, EventBus, EventCallback, StateStore, WILDCARD_TOPIC};
pub use devtools::{
    DevToolsRecorder, DevToolsSnapshot, EventRecord, PerformanceRecord, PluginAction,
    PluginRecord, Probe, RecordPayload, StateChangeRecord, StateSource, Timing, TimingCategory,
};
pub use error::{ConfigError, ConfigResult};
pub use subscription::{ListenerList, Subscription};
