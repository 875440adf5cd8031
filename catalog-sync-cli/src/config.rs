use catalog_sync_core::ChangeDetection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Server URL (e.g., "http://localhost:8080")
    pub server_url: ConfigValue<String>,
    /// Bearer token sent with every request
    #[serde(skip_serializing)]
    pub api_key: ConfigValue<Option<String>>,
    /// Request timeout in seconds
    pub timeout_secs: ConfigValue<u64>,
    /// How changed entities are detected
    pub change_detection: ConfigValue<ChangeDetection>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    server_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    change_detection: Option<ChangeDetection>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |name| std::env::var(name).ok())
    }

    fn load_with_env(
        config_path: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        // Start with defaults
        let mut server_url =
            ConfigValue::new(DEFAULT_SERVER_URL.to_string(), ConfigSource::Default);
        let mut api_key = ConfigValue::new(None, ConfigSource::Default);
        let mut timeout_secs = ConfigValue::new(DEFAULT_TIMEOUT_SECS, ConfigSource::Default);
        let mut change_detection =
            ConfigValue::new(ChangeDetection::default(), ConfigSource::Default);
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(url) = file_config.server_url {
                server_url = ConfigValue::new(url, ConfigSource::File);
            }
            if let Some(key) = file_config.api_key {
                api_key = ConfigValue::new(Some(key), ConfigSource::File);
            }
            if let Some(secs) = file_config.timeout_secs {
                timeout_secs = ConfigValue::new(secs, ConfigSource::File);
            }
            if let Some(detection) = file_config.change_detection {
                change_detection = ConfigValue::new(detection, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Some(url) = env("CATSYNC_SERVER_URL") {
            server_url = ConfigValue::new(url, ConfigSource::Environment);
        }
        if let Some(key) = env("CATSYNC_API_KEY") {
            api_key = ConfigValue::new(Some(key), ConfigSource::Environment);
        }
        if let Some(secs) = env("CATSYNC_TIMEOUT_SECS") {
            let parsed = secs
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CATSYNC_TIMEOUT_SECS", secs.clone()))?;
            timeout_secs = ConfigValue::new(parsed, ConfigSource::Environment);
        }

        Ok(Self {
            server_url,
            api_key,
            timeout_secs,
            change_detection,
            config_file,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.value)
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/catsync/
    /// - macOS: ~/Library/Application Support/catsync/
    /// - Windows: %APPDATA%/catsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("catsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
