//! Sandbox configuration.
//!
//! ```toml
//! max_log_entries = 300
//! focus_delay_ms = 200
//! tag_generations = true
//! allowed_origins = ["https://cdn.jsdelivr.net"]
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default bound of the console buffer.
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 300;

/// Default delay before focus is moved into a freshly loaded frame.
pub const DEFAULT_FOCUS_DELAY_MS: u64 = 200;

/// Configuration for the editor core and the headless frame
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Console entries kept before the oldest are evicted (default: 300)
    pub max_log_entries: usize,
    /// Delay before focusing the sandboxed context after Run (default: 200ms)
    pub focus_delay_ms: u64,
    /// Stamp every sandbox message with the generation that produced it
    pub tag_generations: bool,
    /// Origins the headless frame may fetch external scripts from (empty = none)
    pub allowed_origins: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            focus_delay_ms: DEFAULT_FOCUS_DELAY_MS,
            tag_generations: true,
            allowed_origins: vec![], // external fetches disabled by default
        }
    }
}

impl SandboxConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SandboxConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn focus_delay(&self) -> Duration {
        Duration::from_millis(self.focus_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_log_entries == 0 {
            return Err(ConfigError::Invalid(
                "max_log_entries must be at least 1".to_string(),
            ));
        }
        for origin in &self.allowed_origins {
            let parsed = url::Url::parse(origin)
                .map_err(|e| ConfigError::Invalid(format!("bad origin '{}': {}", origin, e)))?;
            if parsed.origin().ascii_serialization() != *origin {
                return Err(ConfigError::Invalid(format!(
                    "'{}' is not a bare origin (expected '{}')",
                    origin,
                    parsed.origin().ascii_serialization()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.max_log_entries, 300);
        assert_eq!(config.focus_delay(), Duration::from_millis(200));
        assert!(config.tag_generations);
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SandboxConfig::from_toml_str("max_log_entries = 50").unwrap();
        assert_eq!(config.max_log_entries, 50);
        assert_eq!(config.focus_delay_ms, 200);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(SandboxConfig::from_toml_str("max_logs = 5").is_err());
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = SandboxConfig::from_toml_str("max_log_entries = 0").unwrap_err();
        assert!(err.to_string().contains("max_log_entries"));
    }

    #[test]
    fn test_rejects_origin_with_path() {
        let err =
            SandboxConfig::from_toml_str(r#"allowed_origins = ["https://cdn.example.com/lib"]"#)
                .unwrap_err();
        assert!(err.to_string().contains("not a bare origin"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tag_generations = false").unwrap();
        writeln!(file, r#"allowed_origins = ["https://unpkg.com"]"#).unwrap();

        let config = SandboxConfig::from_file(file.path()).unwrap();
        assert!(!config.tag_generations);
        assert_eq!(config.allowed_origins, vec!["https://unpkg.com".to_string()]);
    }

    #[test]
    fn test_missing_file() {
        let err = SandboxConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
