//! Layered configuration: loaders, the merged tree and its manager.
//!
//! - **Values**: [`ConfigObject`] plus dotted-path, merge and diff helpers
//! - **Loaders**: the [`ConfigLoader`] trait and its implementations
//! - **Storage**: [`KeyValueStore`] backends for persisted configuration
//! - **Manager**: [`ConfigManager`], the observable merged tree
//! - **Schema**: non-fatal validation with [`ConfigSchema`]

pub mod loader;
pub mod manager;
pub mod schema;
pub mod storage;
pub mod value;

pub use loader::{
    CompositeConfigLoader, ConfigLoader, EnvironmentConfigLoader, JsonConfigLoader,
    MemoryConfigLoader, SourceCallback, coerce_env_value, parse_document,
};
pub use manager::{ConfigManager, WatchCallback};
pub use schema::{ConfigSchema, FieldRule, ValueKind, Violation};
pub use storage::{
    DEFAULT_STORAGE_KEY, FileStore, KeyValueStore, LocalStorageConfigLoader, MemoryStore,
    StoreCallback,
};
pub use value::{ConfigChange, ConfigObject};
