//! CLI configuration discovery and loading.
//!
//! Discovery hierarchy:
//! 1. Explicit `--config` path
//! 2. Current directory: `./codebox.toml`
//! 3. User config: `~/.codebox/config.toml`
//! 4. Built-in defaults

use crate::{ContainerManagerConfig, EngineConfig, PoolConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Container name prefix override
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_size: Option<usize>,
    pub min_size: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
}

impl CliConfig {
    /// Load from an explicit file or walk the discovery hierarchy.
    pub fn discover(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            info!("Loading configuration from {:?}", path);
            return Self::from_toml_file(path);
        }

        let cwd_config = PathBuf::from("codebox.toml");
        if cwd_config.exists() {
            info!("Loading configuration from {:?}", cwd_config);
            return Self::from_toml_file(&cwd_config);
        }

        if let Some(home) = std::env::home_dir() {
            let user_config = home.join(".codebox").join("config.toml");
            if user_config.exists() {
                info!("Loading configuration from {:?}", user_config);
                return Self::from_toml_file(&user_config);
            }
        }

        Ok(Self::default())
    }

    fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Convert to an engine configuration, defaults filling the gaps.
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut manager = ContainerManagerConfig::default();
        if let Some(prefix) = &self.name_prefix {
            manager.name_prefix = prefix.clone();
        }

        let defaults = PoolConfig::default();
        manager.pool = PoolConfig {
            max_size: self.pool.max_size.unwrap_or(defaults.max_size),
            min_size: self.pool.min_size.unwrap_or(defaults.min_size),
            idle_timeout: self
                .pool
                .idle_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
        };

        EngineConfig { manager }
    }
}
