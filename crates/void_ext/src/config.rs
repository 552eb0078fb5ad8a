//! Extension configuration
//!
//! Loaded from TOML or built in code; every field has a default so an empty
//! document is a valid configuration.

use serde::{Deserialize, Deserializer};
use void_ext_sys::InitLevel;

use crate::error::{BridgeError, Result};
use crate::version::EngineVersion;

/// Environment variable that overrides [`ExtensionConfig::log_filter`]
pub const LOG_ENV: &str = "VOID_EXT_LOG";

/// Settings of one extension library
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtensionConfig {
    /// Oldest engine the extension agrees to load into
    pub minimum_engine_version: EngineVersion,
    /// Lowest initialization level at which the library does any work
    #[serde(deserialize_with = "deserialize_level")]
    pub minimum_init_level: InitLevel,
    /// env_logger filter for records below warning
    pub log_filter: String,
    /// Report handles still alive at teardown
    pub report_leaks: bool,
    /// Ask the editor to surface reported errors
    pub editor_notify: bool,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            minimum_engine_version: EngineVersion::MINIMUM,
            minimum_init_level: InitLevel::Scene,
            log_filter: "info".to_string(),
            report_leaks: true,
            editor_notify: false,
        }
    }
}

impl ExtensionConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Apply environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(filter) = std::env::var(LOG_ENV) {
            if !filter.trim().is_empty() {
                self.log_filter = filter;
            }
        }
        self
    }

    /// Level at which a class declared for `level` is actually registered
    pub fn effective_level(&self, level: InitLevel) -> InitLevel {
        level.max(self.minimum_init_level)
    }
}

/// Parse an initialization level name
pub fn parse_level(name: &str) -> Option<InitLevel> {
    match name.trim().to_ascii_lowercase().as_str() {
        "core" => Some(InitLevel::Core),
        "servers" => Some(InitLevel::Servers),
        "scene" => Some(InitLevel::Scene),
        "editor" => Some(InitLevel::Editor),
        _ => None,
    }
}

fn deserialize_level<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<InitLevel, D::Error> {
    let name = String::deserialize(deserializer)?;
    parse_level(&name).ok_or_else(|| {
        serde::de::Error::custom(format!(
            "unknown init level '{name}', expected one of core, servers, scene, editor"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let config = ExtensionConfig::from_toml_str("").unwrap();
        assert_eq!(config, ExtensionConfig::default());
    }

    #[test]
    fn test_full_document() {
        let config = ExtensionConfig::from_toml_str(
            r#"
            minimum_engine_version = "4.2.1"
            minimum_init_level = "servers"
            log_filter = "void_ext=debug"
            report_leaks = false
            editor_notify = true
            "#,
        )
        .unwrap();

        assert_eq!(config.minimum_engine_version, EngineVersion::new(4, 2, 1));
        assert_eq!(config.minimum_init_level, InitLevel::Servers);
        assert_eq!(config.log_filter, "void_ext=debug");
        assert!(!config.report_leaks);
        assert!(config.editor_notify);
    }

    #[test]
    fn test_invalid_documents() {
        let err = ExtensionConfig::from_toml_str("minimum_init_level = \"physics\"").unwrap_err();
        assert!(matches!(err, BridgeError::Config(msg) if msg.contains("physics")));

        assert!(ExtensionConfig::from_toml_str("minimum_engine_version = \"four\"").is_err());
        assert!(ExtensionConfig::from_toml_str("unknown_key = 1").is_err());
    }

    #[test]
    fn test_effective_level() {
        let config = ExtensionConfig::default();
        assert_eq!(config.effective_level(InitLevel::Core), InitLevel::Scene);
        assert_eq!(config.effective_level(InitLevel::Editor), InitLevel::Editor);
    }
}
