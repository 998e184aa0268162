//! Ember Runtime - composition layer for the Ember engine.
//!
//! This crate provides:
//! - Engine assembly (`Engine`, `EngineBuilder`)
//! - Engine settings loaded with figment (`settings`)
//! - Logging setup on `tracing-subscriber` (`logging`)
//!
//! ```ignore
//! use ember_runtime::Engine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::builder()
//!         .load_settings()
//!         .with_logging()
//!         .config_loader(JsonConfigLoader::from_file("app.json"), 0)
//!         .build()
//!         .await?;
//!
//!     engine.register(MyPlugin)?;
//!     let report = engine.install_all().await;
//!     for failure in &report.failed {
//!         tracing::warn!(error = %failure, "Plugin unavailable");
//!     }
//!
//!     engine.run().await?;
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod logging;
pub mod settings;

pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult, SettingsError, SettingsResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use settings::{EngineSettings, SettingsLoader};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for application code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
