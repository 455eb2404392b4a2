use std::fs;
use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::{DisasmError, Result};

/// Exploration settings, usually read from a TOML file:
///
/// ```toml
/// version = 5
/// drop_zero_padding = true
/// mark_boundaries = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisasmConfig {
    /// Use this version instead of the header's version byte
    pub version: Option<u8>,
    /// Drop short all-zero gaps in front of aligned chunks
    pub drop_zero_padding: bool,
    /// Split data at the end-of-preload and dynamic memory boundaries
    pub mark_boundaries: bool,
}

impl Default for DisasmConfig {
    fn default() -> Self {
        DisasmConfig {
            version: None,
            drop_zero_padding: true,
            mark_boundaries: true,
        }
    }
}

impl DisasmConfig {
    pub fn from_toml_str(text: &str) -> Result<DisasmConfig> {
        let config: DisasmConfig = toml::from_str(text)?;
        if let Some(v) = config.version {
            if !(3..=8).contains(&v) {
                return Err(DisasmError::UnsupportedVersion(v));
            }
        }
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<DisasmConfig> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(DisasmConfig::from_toml_str("").unwrap(), DisasmConfig::default());
    }

    #[test]
    fn fields_override_defaults() {
        let config = DisasmConfig::from_toml_str("version = 8\nmark_boundaries = false\n").unwrap();
        assert_eq!(config.version, Some(8));
        assert!(config.drop_zero_padding);
        assert!(!config.mark_boundaries);
    }

    #[test]
    fn bad_input_is_a_config_error() {
        assert!(matches!(
            DisasmConfig::from_toml_str("verison = 5"),
            Err(DisasmError::Config(_))
        ));
        assert!(matches!(
            DisasmConfig::from_toml_str("version = 2"),
            Err(DisasmError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            DisasmConfig::load("/nonexistent/zdasm.toml"),
            Err(DisasmError::Io(_))
        ));
    }
}
