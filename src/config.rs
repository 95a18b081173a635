use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = "config.toml";
const WORK_OFFLINE_FILE_NAME: &str = "work_offline";
const APP_DIR: &str = "offbeat";

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Remote endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the RPC API endpoint
    pub api_base: String,
    /// Base URL for streaming/fetching audio content
    pub stream_base: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/api/".to_string(),
            stream_base: "http://localhost:8000/stream/".to_string(),
        }
    }
}

/// Local storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Offline store location (empty = default data dir)
    pub data_dir: Option<String>,
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR);

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .context("Failed to read config file")?;

            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Resolve the offline store file path.
    pub fn store_path(&self) -> Result<PathBuf> {
        let data_dir = if let Some(ref custom) = self.storage.data_dir {
            PathBuf::from(custom)
        } else {
            dirs::data_dir()
                .context("Failed to get data directory")?
                .join(APP_DIR)
        };
        fs::create_dir_all(&data_dir)
            .context("Failed to create data directory")?;
        Ok(data_dir.join("offline.redb"))
    }
}

/// The user-forced "work offline" flag.
///
/// Lives in its own one-byte file next to the config so it can be read
/// synchronously before the offline store finishes opening.
#[derive(Debug, Clone)]
pub struct WorkOfflineFlag {
    path: PathBuf,
}

impl WorkOfflineFlag {
    pub fn at_default_location() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR);
        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;
        Ok(Self {
            path: config_dir.join(WORK_OFFLINE_FILE_NAME),
        })
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// Missing or unreadable flag file means "not forced offline".
    pub fn get(&self) -> bool {
        matches!(fs::read(&self.path).as_deref(), Ok([b'1']))
    }

    pub fn set(&self, enabled: bool) -> Result<()> {
        fs::write(&self.path, if enabled { "1" } else { "0" })
            .context("Failed to write work-offline flag")?;
        Ok(())
    }
}
