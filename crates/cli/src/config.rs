use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use eyre::Result;
use madmin_store::RegistryConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_registry")]
    pub registry: RegistryConfig,
    /// Name recorded on review actions when `--reviewer` is not given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            reviewer: None,
        }
    }
}

fn default_registry() -> RegistryConfig {
    RegistryConfig {
        modules_dir: PathBuf::from("./modules"),
        state_dir: get_default_data_dir().join("state"),
        ..Default::default()
    }
}

impl Config {
    pub fn get_config_path() -> PathBuf {
        get_default_config_dir().join("config.json")
    }

    /// Load from `path`, or from the default location. A missing default file is created.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::get_config_path);

        if !fs::try_exists(&config_path).await? {
            if path.is_some() {
                return Err(eyre::eyre!(
                    "Configuration file {} does not exist",
                    config_path.display()
                ));
            }
            let default_config = Self::default();
            default_config.save_to(&config_path).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&config_path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub async fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content).await?;
        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').collect();

        match parts.as_slice() {
            ["registry", "modules_dir"] => {
                self.registry.modules_dir = PathBuf::from(value);
            }
            ["registry", "state_dir"] => {
                self.registry.state_dir = PathBuf::from(value);
            }
            ["registry", "history_depth"] => {
                self.registry.history_depth = value
                    .parse()
                    .map_err(|_| eyre::eyre!("Invalid number: {}", value))?;
            }
            ["registry", "rebuild_interval_secs"] => {
                self.registry.rebuild_interval_secs = value
                    .parse()
                    .map_err(|_| eyre::eyre!("Invalid number: {}", value))?;
            }
            ["registry", "enrich_stats"] => {
                self.registry.enrich_stats = value
                    .parse::<bool>()
                    .map_err(|_| eyre::eyre!("Invalid boolean value: {}", value))?;
            }
            ["registry", "github_token"] => {
                self.registry.github_token = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            ["reviewer"] => {
                self.reviewer = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            _ => {
                return Err(eyre::eyre!("Unknown configuration key: {}", key));
            }
        }

        self.registry.validate()?;
        Ok(())
    }

    pub fn get_value(&self, key: &str) -> Result<String> {
        let parts: Vec<&str> = key.split('.').collect();

        let value = match parts.as_slice() {
            ["registry", "modules_dir"] => self.registry.modules_dir.display().to_string(),
            ["registry", "state_dir"] => self.registry.state_dir.display().to_string(),
            ["registry", "history_depth"] => self.registry.history_depth.to_string(),
            ["registry", "rebuild_interval_secs"] => {
                self.registry.rebuild_interval_secs.to_string()
            }
            ["registry", "enrich_stats"] => self.registry.enrich_stats.to_string(),
            ["registry", "github_token"] => self
                .registry
                .github_token
                .as_ref()
                .map(|_| "(set)".to_string())
                .unwrap_or_default(),
            ["reviewer"] => self.reviewer.clone().unwrap_or_default(),
            _ => {
                return Err(eyre::eyre!("Unknown configuration key: {}", key));
            }
        };

        Ok(value)
    }

    pub fn show_all(&self) -> String {
        format!(
            "Configuration:\n\
             Registry:\n\
             ├─ modules_dir: {}\n\
             ├─ state_dir: {}\n\
             ├─ history_depth: {}\n\
             ├─ rebuild_interval_secs: {}\n\
             ├─ enrich_stats: {}\n\
             └─ github_token: {}\n\
             Reviewer: {}",
            self.registry.modules_dir.display(),
            self.registry.state_dir.display(),
            self.registry.history_depth,
            self.registry.rebuild_interval_secs,
            self.registry.enrich_stats,
            if self.registry.github_token.is_some() {
                "(set)"
            } else {
                "(not set)"
            },
            self.reviewer.as_deref().unwrap_or("(not set)"),
        )
    }
}

/// Get the default configuration directory
fn get_default_config_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("org", "madmin", "madmin-registry") {
        proj_dirs.config_dir().to_path_buf()
    } else {
        PathBuf::from(".madmin").join("config")
    }
}

/// Get the default data directory
fn get_default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("org", "madmin", "madmin-registry") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".madmin").join("data")
    }
}
