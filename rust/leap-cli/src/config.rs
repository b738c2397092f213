//! Configuration file parsing for `leap.toml`.
//!
//! The file lives in the app directory. Without one, every field takes its
//! default.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;

pub const CONFIG_FILE: &str = "leap.toml";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LeapConfig {
    /// Entry script, relative to the app directory.
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Extra Lua source run after the built-in boot chunk.
    #[serde(default)]
    pub boot: Option<String>,
    /// Extra directories, relative to the app directory, searched by `require`.
    #[serde(default)]
    pub package_path: Vec<String>,
}

fn default_entry() -> String {
    "main.lua".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LeapConfig {
    fn default() -> Self {
        Self {
            entry: default_entry(),
            log_level: default_log_level(),
            boot: None,
            package_path: Vec::new(),
        }
    }
}

impl LeapConfig {
    /// Load `leap.toml` from `dir`, or the defaults when there is none.
    pub fn load_from_dir(dir: &Path) -> Result<Self, AppError> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let config_error = |message: String| AppError::Config {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config = Self::from_str(&content).map_err(|e| config_error(e.to_string()))?;
        config.level().map_err(|e| config_error(e.to_string()))?;
        Ok(config)
    }

    /// Parse a TOML string directly.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn level(&self) -> Result<Level, AppError> {
        self.log_level
            .parse()
            .map_err(|_| AppError::LogLevel(self.log_level.clone()))
    }

    /// Generate a default `leap.toml` template.
    pub fn default_template() -> &'static str {
        r#"# Leap application configuration

# Entry script, relative to this directory
entry = "main.lua"

# trace | debug | info | warn | error
log_level = "info"

# Lua source run before the entry script, after `leap = require('leap')`
# boot = "json = require('json')"

# Extra directories searched by require(), relative to this directory
# package_path = ["lib"]
"#
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = LeapConfig::from_str("").expect("should parse");
        assert_eq!(cfg, LeapConfig::default());
        assert_eq!(cfg.entry, "main.lua");
        assert_eq!(cfg.level().unwrap(), Level::INFO);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
entry = "app.lua"
log_level = "debug"
boot = "answer = 42"
package_path = ["lib", "vendor/lua"]
"#;
        let cfg: LeapConfig = toml::from_str(toml_str).expect("should parse");
        assert_eq!(cfg.entry, "app.lua");
        assert_eq!(cfg.level().unwrap(), Level::DEBUG);
        assert_eq!(cfg.boot.as_deref(), Some("answer = 42"));
        assert_eq!(cfg.package_path, vec!["lib", "vendor/lua"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(LeapConfig::from_str("entyr = \"main.lua\"").is_err());
    }

    #[test]
    fn bad_log_level_is_reported() {
        let cfg = LeapConfig::from_str("log_level = \"loud\"").expect("should parse");
        assert!(matches!(cfg.level(), Err(AppError::LogLevel(level)) if level == "loud"));
    }

    #[test]
    fn default_template_is_valid_toml() {
        let cfg = LeapConfig::from_str(LeapConfig::default_template())
            .expect("template should parse");
        assert_eq!(cfg, LeapConfig::default());
    }
}
