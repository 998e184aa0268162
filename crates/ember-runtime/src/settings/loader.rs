//! Engine settings loader using figment.
//!
//! Settings control the engine itself (devtools, plugin registry, logging),
//! not the application configuration served by
//! [`ConfigManager`](ember_core::ConfigManager).
//!
//! # Feature Flags
//!
//! - `toml-config`: enables TOML settings files (`ember.toml`)
//!
//! # Settings Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Settings passed to [`SettingsLoader::merge`]
//! 3. Profile-specific settings file (`ember.{profile}.toml`)
//! 4. Main settings file (`ember.toml`)
//! 5. Environment variables (`EMBER_*`)
//! 6. Single values passed to [`SettingsLoader::set`]
//!
//! # Environment Variable Mapping
//!
//! Environment variables are mapped using the `EMBER_` prefix with `__` as separator:
//!
//! - `EMBER_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `EMBER_DEVTOOLS__ENABLED=true` → `devtools.enabled = true`
//!
//! `EMBER_PROFILE` selects the profile and is not a setting.
//!
//! # Example
//!
//! ```rust,ignore
//! use ember_runtime::settings::SettingsLoader;
//!
//! let settings = SettingsLoader::new()
//!     .profile("production")
//!     .set("devtools.enabled", true)
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(feature = "toml-config")]
use figment::providers::{Format, Toml};
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info, trace};

use super::schema::EngineSettings;
use super::validation::validate_settings;
use crate::error::{SettingsError, SettingsResult};

/// Environment variable selecting the settings profile.
pub const PROFILE_ENV: &str = "EMBER_PROFILE";

/// Settings profile for environment-specific files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `dev` and `prod` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads [`PROFILE_ENV`], defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder-style loader for [`EngineSettings`].
pub struct SettingsLoader {
    base: Figment,
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    settings_file: Option<PathBuf>,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsLoader {
    /// Creates a loader with the profile taken from the environment.
    pub fn new() -> Self {
        Self {
            base: Figment::new(),
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            settings_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory searched for settings files.
    ///
    /// When none are added, the current directory and the user config
    /// directory (`<config_dir>/ember`) are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(config_dir) => self.search_path(config_dir.join("ember")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.settings_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges whole settings right above the built-in defaults.
    pub fn merge(mut self, settings: EngineSettings) -> Self {
        self.base = self.base.merge(Serialized::defaults(settings));
        self
    }

    /// Overrides a single dotted key above every other source.
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads and validates the settings.
    pub fn load(self) -> SettingsResult<EngineSettings> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let settings: EngineSettings = figment.extract()?;
        validate_settings(&settings)?;

        debug!(
            profile = %profile,
            logging_level = %settings.logging.level,
            devtools = settings.devtools.enabled,
            "Engine settings loaded"
        );

        Ok(settings)
    }

    fn build_figment(mut self) -> SettingsResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(EngineSettings::default()));
        figment = figment.merge(std::mem::take(&mut self.base));

        if let Some(path) = self.settings_file.take() {
            if !path.exists() {
                return Err(SettingsError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading settings file");
            figment = Self::merge_settings_file(figment, &path)?;
        } else {
            figment = self.load_settings_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with EMBER_ prefix");
            figment = figment.merge(Env::prefixed("EMBER_").ignore(&["profile"]).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    fn merge_settings_file(figment: Figment, path: &Path) -> SettingsResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            _ => Err(SettingsError::UnsupportedFormat(ext.to_string())),
        }
    }

    #[cfg(feature = "toml-config")]
    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ember"));
        }
        paths
    }

    /// Merges the profile file, then the main file, from the first search
    /// path that has a main file.
    #[cfg(feature = "toml-config")]
    fn load_settings_files(&self, mut figment: Figment) -> Figment {
        for search_path in self.resolve_search_paths() {
            let profile_path = search_path.join(format!("ember.{}.toml", self.profile.as_str()));
            if profile_path.exists() {
                debug!(path = %profile_path.display(), "Loading profile-specific settings");
                figment = figment.merge(Toml::file(&profile_path));
            }

            let base_path = search_path.join("ember.toml");
            if base_path.exists() {
                info!(path = %base_path.display(), "Loading settings file");
                return figment.merge(Toml::file(&base_path));
            }
        }
        debug!("No settings file found, using defaults");
        figment
    }

    #[cfg(not(feature = "toml-config"))]
    fn load_settings_files(&self, figment: Figment) -> Figment {
        if !self.search_paths.is_empty() {
            tracing::warn!("Settings search paths given but no settings file format is enabled");
        }
        figment
    }
}

// =============================================================================
// Tests
// =============================================================================
