//! Engine settings validation.

use super::schema::{EngineSettings, LogOutput};
use crate::error::{SettingsError, SettingsResult};

/// Validates settings after extraction.
pub fn validate_settings(settings: &EngineSettings) -> SettingsResult<()> {
    if settings.devtools.capacity == 0 {
        return Err(SettingsError::validation(
            "devtools.capacity must be greater than 0",
        ));
    }

    if let Some(target) = settings.logging.filters.keys().find(|t| t.trim().is_empty()) {
        return Err(SettingsError::validation(format!(
            "logging.filters contains an empty target: {target:?}"
        )));
    }

    if settings.logging.output == LogOutput::File
        && settings
            .logging
            .file_path
            .as_ref()
            .is_some_and(|p| p.file_name().is_none())
    {
        return Err(SettingsError::validation(
            "logging.file_path must name a file",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(validate_settings(&EngineSettings::default()).is_ok());
    }

    #[test]
    fn test_zero_capacity() {
        let mut settings = EngineSettings::default();
        settings.devtools.capacity = 0;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_log_file_path() {
        let mut settings = EngineSettings::default();
        settings.logging.output = LogOutput::File;
        settings.logging.file_path = Some(PathBuf::from("/"));
        assert!(validate_settings(&settings).is_err());

        settings.logging.file_path = Some(PathBuf::from("logs/ember.log"));
        assert!(validate_settings(&settings).is_ok());
    }
}
