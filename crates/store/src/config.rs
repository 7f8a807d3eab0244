use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Settings for one registry instance: where submissions come from, where
/// state lives, and how strict validation is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory holding one `*.json` manifest per submission.
    pub modules_dir: PathBuf,

    /// Directory for snapshots, verification records and exports.
    pub state_dir: PathBuf,

    /// Number of superseded snapshots kept for incremental diffs.
    pub history_depth: usize,

    /// Seconds between scheduled build cycles.
    pub rebuild_interval_secs: u64,

    /// Decorate accepted manifests with repository statistics.
    pub enrich_stats: bool,

    /// Token used by the GitHub stats provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,

    pub validation: ValidationLimits,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            modules_dir: PathBuf::from("./modules"),
            state_dir: PathBuf::from("./state"),
            history_depth: 8,
            rebuild_interval_secs: 300,
            enrich_stats: false,
            github_token: None,
            validation: ValidationLimits::default(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_depth == 0 {
            return Err(StoreError::ConfigError(
                "history_depth must be at least 1".to_string(),
            ));
        }
        if self.rebuild_interval_secs == 0 {
            return Err(StoreError::ConfigError(
                "rebuild_interval_secs must be greater than 0".to_string(),
            ));
        }
        self.validation.validate()
    }
}

/// Bounds enforced by the schema validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationLimits {
    pub id_min_length: usize,
    pub id_max_length: usize,
    pub max_tags: usize,
    pub max_tag_length: usize,
    pub max_features: usize,
    pub max_feature_length: usize,
    pub max_os_length: usize,
    pub allowed_url_schemes: Vec<String>,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            id_min_length: 2,
            id_max_length: 64,
            max_tags: 20,
            max_tag_length: 32,
            max_features: 30,
            max_feature_length: 200,
            max_os_length: 32,
            allowed_url_schemes: vec!["https".to_string(), "http".to_string()],
        }
    }
}

impl ValidationLimits {
    pub fn validate(&self) -> Result<()> {
        if self.id_min_length == 0 || self.id_min_length > self.id_max_length {
            return Err(StoreError::ConfigError(format!(
                "invalid identifier length bounds {}..={}",
                self.id_min_length, self.id_max_length
            )));
        }
        if self.allowed_url_schemes.is_empty() {
            return Err(StoreError::ConfigError(
                "allowed_url_schemes must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"history_depth": 3, "validation": {"max_tags": 5}}"#)
                .unwrap();
        assert_eq!(config.history_depth, 3);
        assert_eq!(config.validation.max_tags, 5);
        assert_eq!(config.validation.id_max_length, 64);
        assert_eq!(config.modules_dir, PathBuf::from("./modules"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_history() {
        let config = RegistryConfig {
            history_depth: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StoreError::ConfigError(_))));
    }
}
