use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use madmin_store::RegistryConfig;

/// Server settings, layered from an optional file and `MADMIN_` environment variables.
///
/// Nested keys use `__`, e.g. `MADMIN_REGISTRY__STATE_DIR=/var/lib/madmin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind: String,

    /// Bearer token required by the review and rebuild endpoints. Unset leaves them open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,

    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            admin_token: None,
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` if given, otherwise from `madmin.{toml,json,yaml}` in the working
    /// directory when present. Environment variables win over both.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("madmin").required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("MADMIN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(
            &path,
            r#"{ "bind": "0.0.0.0:9000", "registry": { "history_depth": 3 } }"#,
        )
        .unwrap();

        let config = ServerConfig::load(Some(&path)).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.registry.history_depth, 3);
        assert_eq!(config.registry.rebuild_interval_secs, 300);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ServerConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
