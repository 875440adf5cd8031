//! Server configuration.
//!
//! Environment variables:
//! - `CATALOGSYNC_PORT`: Port to listen on (default: 8080)
//! - `CATALOGSYNC_DATA_DIR`: Directory for trees and assets (default: ~/.local/share/catalogsync-server)
//! - `CATALOGSYNC_CONFIG`: Path to config file (default: ~/.config/catalogsync-server/config.yaml)
//! - `CATALOGSYNC_MAX_BODY_MB`: Largest accepted request body (default: 32)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     client: "editor-1"
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_BODY_MB: usize = 32;

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    client: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Self {
        let port = env("CATALOGSYNC_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let data_dir = env("CATALOGSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("catalogsync-server")
            });

        let config_path = env("CATALOGSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("catalogsync-server")
                    .join("config.yaml")
            });

        let max_body_mb = env("CATALOGSYNC_MAX_BODY_MB")
            .and_then(|m| m.parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_MB);

        Self {
            port,
            data_dir,
            config_path,
            max_body_bytes: max_body_mb * 1024 * 1024,
        }
    }
}

/// Authenticated client, added to request extensions after auth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClient {
    pub name: String,
}

/// API key store - maps key -> client
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthClient>,
}

impl ApiKeyStore {
    /// Load API keys from config file.
    ///
    /// A missing or unreadable file yields an empty store, which leaves the
    /// server open.
    pub fn load(config_path: &Path) -> Self {
        let keys = match std::fs::read_to_string(config_path) {
            Ok(contents) => match serde_yaml::from_str::<ConfigFile>(&contents) {
                Ok(config) => {
                    let map: HashMap<_, _> = config
                        .api_keys
                        .into_iter()
                        .map(|entry| (entry.key, AuthClient { name: entry.client }))
                        .collect();
                    tracing::info!("Loaded {} API key(s)", map.len());
                    map
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file: {}", e);
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                HashMap::new()
            }
        };

        if keys.is_empty() {
            tracing::warn!("No API keys loaded - requests will not be authenticated");
        }
        Self { keys }
    }

    pub fn from_keys<I, K, C>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, C)>,
        K: Into<String>,
        C: Into<String>,
    {
        Self {
            keys: entries
                .into_iter()
                .map(|(key, client)| (key.into(), AuthClient { name: client.into() }))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Validate an API key and return the associated client
    pub fn validate(&self, key: &str) -> Option<AuthClient> {
        self.keys.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_body_bytes, 32 * 1024 * 1024);
        assert!(config.data_dir.ends_with("catalogsync-server"));
        assert!(config.config_path.ends_with("config.yaml"));
    }

    #[test]
    fn test_env_values() {
        let config = Config::from_lookup(|name| match name {
            "CATALOGSYNC_PORT" => Some("9090".into()),
            "CATALOGSYNC_DATA_DIR" => Some("/srv/catalog".into()),
            "CATALOGSYNC_MAX_BODY_MB" => Some("1".into()),
            _ => None,
        });
        assert_eq!(config.port, 9090);
        assert_eq!(config.data_dir, PathBuf::from("/srv/catalog"));
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let config = Config::from_lookup(|name| {
            (name == "CATALOGSYNC_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_load_api_keys() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "api_keys:\n  - key: secret\n    client: editor-1\n",
        )
        .unwrap();

        let store = ApiKeyStore::load(&path);
        assert_eq!(
            store.validate("secret"),
            Some(AuthClient {
                name: "editor-1".into()
            })
        );
        assert!(store.validate("other").is_none());
    }

    #[test]
    fn test_missing_config_is_empty() {
        let temp_dir = tempdir().unwrap();
        let store = ApiKeyStore::load(&temp_dir.path().join("missing.yaml"));
        assert!(store.is_empty());
    }
}
