//! Server configuration.
//!
//! Looked up in order: explicit `--config` path, `TASKQ_CONFIG`, then
//! `<config_dir>/taskq/config.toml`. With none of them present the built-in
//! defaults are used. `TASKQ_BIND_ADDR` overrides the bind address.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskq_core::QueueConfig;
use thiserror::Error;

pub const CONFIG_ENV: &str = "TASKQ_CONFIG";
pub const BIND_ADDR_ENV: &str = "TASKQ_BIND_ADDR";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind_addr: String,
    /// Idle period between `connection` keep-alive events on a waiting stream.
    pub keepalive_interval_secs: u64,
    pub queue: QueueConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            keepalive_interval_secs: DEFAULT_KEEPALIVE_INTERVAL_SECS,
            queue: QueueConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Resolve, read and validate the configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let user_path = dirs::config_dir().map(|dir| dir.join("taskq").join("config.toml"));

        let mut config = match resolve_path(explicit, env_path, user_path)? {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::info!("No config file found, using defaults");
                Self::default()
            }
        };

        if let Ok(addr) = std::env::var(BIND_ADDR_ENV) {
            config.bind_addr = addr;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents)?;
        tracing::info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid(format!("bind_addr {:?}: {e}", self.bind_addr)))?;
        if self.keepalive_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "keepalive_interval_secs must be greater than zero".into(),
            ));
        }
        self.queue.validate().map_err(ConfigError::Invalid)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

/// Pick the config file to read. Explicit and environment paths must
/// exist; the per-user file is optional.
pub fn resolve_path(
    explicit: Option<&Path>,
    env_path: Option<PathBuf>,
    user_path: Option<PathBuf>,
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf()).map(Some);
    }
    if let Some(path) = env_path {
        return existing(path).map(Some);
    }
    Ok(user_path.filter(|path| path.exists()))
}

fn existing(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(ConfigError::NotFound(path))
    }
}
