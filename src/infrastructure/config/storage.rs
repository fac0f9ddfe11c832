use super::loader_config::{APP_NAME, APP_ORGANIZATION, APP_QUALIFIER, LoaderConfig};
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const CONFIG_FILE_NAME: &str = "pixfetch.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Reads and writes the loader configuration file.
pub struct ConfigStorage {
    config_dir: PathBuf,
}

impl ConfigStorage {
    /// Create a new `ConfigStorage` rooted at the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration directory cannot be determined.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::ConfigDirNotFound)?;

        Ok(Self { config_dir })
    }

    /// Creates a new `ConfigStorage` with a specific directory (useful for testing).
    #[must_use]
    pub fn with_dir(path: PathBuf) -> Self {
        Self { config_dir: path }
    }

    /// Returns the configuration directory path.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Returns the configuration file path.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Loads the loader configuration.
    ///
    /// A missing file yields the defaults; a malformed file is reported and
    /// replaced by the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<LoaderConfig, ConfigError> {
        let config_path = path_override.map_or_else(|| self.config_path(), Path::to_path_buf);

        if !config_path.exists() {
            info!(path = %config_path.display(), "Config file not found, using defaults");
            return Ok(LoaderConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str::<LoaderConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Failed to parse config file: {}. Using defaults.", e);
                Ok(LoaderConfig::default())
            }
        }
    }

    /// Saves the loader configuration, replacing the file atomically.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the directory or file cannot be written.
    pub fn save_config(&self, config: &LoaderConfig) -> Result<(), ConfigError> {
        if !self.config_dir.exists() {
            info!("Creating configuration directory at {:?}", self.config_dir);
            fs::create_dir_all(&self.config_dir)?;
        }
        Self::save_to_file(&self.config_path(), config)
    }

    fn save_to_file<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(data)?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.persist(path).map_err(|e| e.error)?;

        Ok(())
    }
}
