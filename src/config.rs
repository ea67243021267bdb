use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Level};

use crate::input::InputSettings;

const CONFIG_DIR: &str = "padhub";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputSettings,
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Parsed log level, `INFO` when the configured name is unknown.
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or_else(|_| {
            warn!("Unknown log level {:?}, using info", self.level);
            Level::INFO
        })
    }
}

impl AppConfig {
    /// `<config dir>/padhub/config.toml`, falling back to the home directory
    /// and then the working directory.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| {
                warn!("Could not determine config directory, using current directory");
                PathBuf::from(".")
            });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content, path)?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(&Self::default_path())
    }
}
