use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::ModelResult;

pub const DEFAULT_CONFIG_NAME: &str = "folio.config.json";

/// Engine configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Maximum number of undo levels (0 = unlimited)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Name of the root created with every new document
    #[serde(default = "default_main_root")]
    pub main_root: String,

    /// Key prefix for selection attributes persisted on empty elements
    #[serde(default = "default_selection_prefix")]
    pub selection_attribute_prefix: String,

    #[serde(default)]
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaConfig {
    /// Elements that may hold text. Empty means every element may.
    #[serde(default)]
    pub text_containers: Vec<String>,

    /// Elements whose content is never merged with the outside.
    #[serde(default)]
    pub limits: Vec<String>,
}

fn default_history_limit() -> usize {
    100
}

fn default_main_root() -> String {
    "main".to_string()
}

fn default_selection_prefix() -> String {
    "selection:".to_string()
}

impl EditorConfig {
    /// Load config from a directory, falling back to defaults
    pub fn load(dir: impl AsRef<Path>) -> ModelResult<Self> {
        let config_path = dir.as_ref().join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(EditorConfig::default())
        }
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            main_root: default_main_root(),
            selection_attribute_prefix: default_selection_prefix(),
            schema: SchemaConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "historyLimit": 5,
            "schema": { "textContainers": ["paragraph"], "limits": ["tableCell"] }
        }"#;

        let config: EditorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.main_root, "main");
        assert_eq!(config.schema.text_containers, vec!["paragraph"]);
        assert_eq!(config.schema.limits, vec!["tableCell"]);
    }

    #[test]
    fn test_default_config() {
        let config = EditorConfig::default();
        assert_eq!(config.history_limit, 100);
        assert_eq!(config.selection_attribute_prefix, "selection:");
        assert!(config.schema.text_containers.is_empty());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = EditorConfig::load("/nonexistent-folio-dir").unwrap();
        assert_eq!(config, EditorConfig::default());
    }
}
