//! Editor configuration.
//!
//! Every field has a default from [`constants`](crate::constants), so an empty
//! TOML file is a valid config. Durations are milliseconds:
//!
//! ```toml
//! autosave_debounce_ms = 800
//! save_timeout_ms = 15000
//! upload_timeout_ms = 60000
//! max_upload_bytes = 5242880
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{AUTOSAVE_DEBOUNCE, MAX_UPLOAD_BYTES, SAVE_TIMEOUT, UPLOAD_TIMEOUT};

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for one editing session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditorConfig {
    pub autosave_debounce_ms: u64,
    pub save_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub max_upload_bytes: u64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: AUTOSAVE_DEBOUNCE.as_millis() as u64,
            save_timeout_ms: SAVE_TIMEOUT.as_millis() as u64,
            upload_timeout_ms: UPLOAD_TIMEOUT.as_millis() as u64,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

impl EditorConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would make the editor unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.save_timeout_ms == 0 {
            return Err(ConfigError::Invalid("save_timeout_ms must be > 0".into()));
        }
        if self.upload_timeout_ms == 0 {
            return Err(ConfigError::Invalid("upload_timeout_ms must be > 0".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be > 0".into()));
        }
        Ok(())
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EditorConfig::from_toml_str("").unwrap();
        assert_eq!(config, EditorConfig::default());
        assert_eq!(config.autosave_debounce(), AUTOSAVE_DEBOUNCE);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_override() {
        let config = EditorConfig::from_toml_str("autosave_debounce_ms = 250").unwrap();
        assert_eq!(config.autosave_debounce(), Duration::from_millis(250));
        assert_eq!(config.save_timeout(), SAVE_TIMEOUT);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = EditorConfig::from_toml_str("save_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = EditorConfig::from_toml_str("autosave = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "upload_timeout_ms = 5000").unwrap();
        writeln!(file, "max_upload_bytes = 1024").unwrap();

        let config = EditorConfig::load(file.path()).unwrap();
        assert_eq!(config.upload_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_upload_bytes, 1024);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EditorConfig::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
