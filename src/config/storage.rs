//! Configuration Storage
//!
//! Config location: `$SHELLGATE_CONFIG` if set, otherwise
//! `<platform config dir>/shellgate/gateway.json`.

use std::path::PathBuf;
use tokio::fs;

use super::types::GatewayConfig;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "SHELLGATE_CONFIG";

/// Environment variable overriding the listen address
pub const BIND_ENV: &str = "SHELLGATE_BIND";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Get the shellgate configuration directory
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .map(|dir| dir.join("shellgate"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Get the default config file path
pub fn config_file() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("gateway.json"))
}

/// Reads the gateway config file
pub struct ConfigStorage {
    path: PathBuf,
    /// Whether the path was named explicitly (a missing explicit file is an error)
    explicit: bool,
}

impl ConfigStorage {
    /// Storage at `$SHELLGATE_CONFIG`, or the default path
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Ok(Self {
                path: PathBuf::from(path),
                explicit: true,
            }),
            None => Ok(Self {
                path: config_file()?,
                explicit: false,
            }),
        }
    }

    /// Storage with custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            explicit: true,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load and validate the configuration
    ///
    /// A missing default file yields defaults; a missing explicit file does not.
    pub async fn load(&self) -> Result<GatewayConfig, ConfigError> {
        let mut config = match fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str::<GatewayConfig>(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !self.explicit => {
                tracing::debug!("No config file at {:?}, using defaults", self.path);
                GatewayConfig::default()
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if let Ok(bind) = std::env::var(BIND_ENV) {
            config.bind = bind;
        }

        config.validate()?;
        Ok(config)
    }
}
