use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::expand_tilde;

/// Address of the tablet's USB web interface
pub const DEFAULT_DEVICE_URL: &str = "http://10.11.99.1";

/// Application settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub device_url: String,
    /// Where downloads are written; relative paths resolve against the working directory
    pub download_dir: PathBuf,
    /// Export format requested from the download endpoint
    pub download_format: String,
    pub request_timeout_secs: u64,
    /// Upper bound on a whole upload request
    pub upload_timeout_secs: u64,
    /// A download fails when no data arrives for this long
    pub download_idle_timeout_secs: u64,
    /// How long a status message stays visible, 0 keeps it until replaced
    pub status_ttl_secs: u64,
    /// Listing attempts before an upload gives up; 1 means no automatic retry
    pub pre_upload_refresh_attempts: u32,
    /// How long quitting waits for background transfers to stop
    pub shutdown_grace_ms: u64,
    pub tick_rate_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_url: DEFAULT_DEVICE_URL.to_string(),
            download_dir: PathBuf::from("."),
            download_format: "pdf".to_string(),
            request_timeout_secs: 10,
            upload_timeout_secs: 120,
            download_idle_timeout_secs: 30,
            status_ttl_secs: 5,
            pre_upload_refresh_attempts: 1,
            shutdown_grace_ms: 500,
            tick_rate_ms: 250,
        }
    }
}

impl AppSettings {
    /// Validates the settings
    pub fn validate(&self) -> Result<()> {
        if !(self.device_url.starts_with("http://") || self.device_url.starts_with("https://")) {
            return Err(AppError::ValidationError(format!(
                "Device URL must start with http:// or https://, got '{}'",
                self.device_url
            )));
        }

        if self.download_format.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Download format cannot be empty".to_string(),
            ));
        }

        if self.pre_upload_refresh_attempts == 0 {
            return Err(AppError::ValidationError(
                "pre_upload_refresh_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn status_ttl(&self) -> Option<Duration> {
        (self.status_ttl_secs > 0).then(|| Duration::from_secs(self.status_ttl_secs))
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs.max(1))
    }

    pub fn download_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.download_idle_timeout_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms.max(16))
    }
}

/// Main configuration structure
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub settings: AppSettings,
}

/// Loads settings from disk and layers command line overrides on top
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Load the configuration from the default location
    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Load the configuration from a custom path
    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Self::load_config_from_path(&config_path)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Get the default configuration file path
    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or_else(|| {
                AppError::ConfigError("Could not determine the config directory".to_string())
            })?;

        Ok(config_dir.join("rmtui").join("config.toml"))
    }

    /// Load configuration from the specified path
    fn load_config_from_path(config_path: &Path) -> Result<Config> {
        if !config_path.exists() {
            // Return default config if file doesn't exist
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(config_path)
            .map_err(|e| AppError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&config_content)
            .map_err(|e| AppError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> &AppSettings {
        &self.config.settings
    }

    /// Apply command line overrides, expand `~` in the download directory,
    /// then validate the result
    pub fn apply_overrides(
        &mut self,
        device_url: Option<String>,
        download_dir: Option<PathBuf>,
    ) -> Result<()> {
        let settings = &mut self.config.settings;
        if let Some(url) = device_url {
            settings.device_url = url;
        }
        if let Some(dir) = download_dir {
            settings.download_dir = dir;
        }
        if let Some(expanded) = settings.download_dir.to_str().map(expand_tilde) {
            settings.download_dir = expanded;
        }
        settings.validate()
    }

    pub fn into_settings(self) -> AppSettings {
        self.config.settings
    }
}
