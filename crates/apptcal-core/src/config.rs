//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which selects the auth backend, the credential storage, and the
//! verification timeouts.
//!
//! Configuration is stored at `~/.config/apptcal/config.json`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "apptcal";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default GraphQL endpoint (local serverless-offline)
pub const DEFAULT_GRAPHQL_ENDPOINT: &str = "http://localhost:3000/graphql";

/// Default HTTP request timeout for the GraphQL client
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Environment variable selecting the backend (`mock` or `graphql`)
pub const ENV_API_TYPE: &str = "APPTCAL_API_TYPE";

/// Environment variable overriding the GraphQL endpoint
pub const ENV_GRAPHQL_ENDPOINT: &str = "APPTCAL_GRAPHQL_ENDPOINT";

/// Which auth backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    Mock,
    Graphql,
}

impl ApiType {
    /// Parse a backend name. Anything unrecognised selects the mock backend.
    pub fn parse_lenient(s: &str) -> Self {
        match s.parse() {
            Ok(api) => api,
            Err(_) => {
                warn!(api_type = %s, "Unknown API type, falling back to mock");
                ApiType::Mock
            }
        }
    }
}

impl FromStr for ApiType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mock" => Ok(ApiType::Mock),
            "graphql" => Ok(ApiType::Graphql),
            other => Err(format!("unknown API type: {}", other)),
        }
    }
}

/// Where the credential pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Keyring,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_type: ApiType,
    pub graphql_endpoint: String,
    pub storage: StorageKind,
    pub request_timeout_secs: u64,
    /// Background verification timeout. `None` waits indefinitely.
    pub verify_timeout_secs: Option<u64>,
    pub mock_latency_ms: u64,
    /// Admin accounts must have an email in this domain (extra tamper check).
    pub admin_email_domain: Option<String>,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_type: ApiType::Mock,
            graphql_endpoint: DEFAULT_GRAPHQL_ENDPOINT.to_string(),
            storage: StorageKind::File,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            verify_timeout_secs: None,
            mock_latency_ms: 0,
            admin_email_domain: None,
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api) = lookup(ENV_API_TYPE) {
            self.api_type = ApiType::parse_lenient(&api);
        }
        if let Some(endpoint) = lookup(ENV_GRAPHQL_ENDPOINT) {
            if !endpoint.trim().is_empty() {
                self.graphql_endpoint = endpoint;
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Option<Duration> {
        self.verify_timeout_secs.map(Duration::from_secs)
    }

    pub fn mock_latency(&self) -> Duration {
        Duration::from_millis(self.mock_latency_ms)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_type, ApiType::Mock);
        assert_eq!(config.storage, StorageKind::File);
        assert_eq!(config.graphql_endpoint, DEFAULT_GRAPHQL_ENDPOINT);
        assert_eq!(config.verify_timeout(), None);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"api_type":"graphql","verify_timeout_secs":5}"#).unwrap();
        assert_eq!(config.api_type, ApiType::Graphql);
        assert_eq!(config.verify_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            ENV_API_TYPE => Some("GraphQL".to_string()),
            ENV_GRAPHQL_ENDPOINT => Some("https://api.example.com/graphql".to_string()),
            _ => None,
        });
        assert_eq!(config.api_type, ApiType::Graphql);
        assert_eq!(config.graphql_endpoint, "https://api.example.com/graphql");
    }

    #[test]
    fn test_unknown_api_type_falls_back_to_mock() {
        assert_eq!(ApiType::parse_lenient("rest"), ApiType::Mock);
        assert_eq!(ApiType::parse_lenient(" graphql "), ApiType::Graphql);
    }

    #[test]
    fn test_blank_endpoint_override_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| (key == ENV_GRAPHQL_ENDPOINT).then(|| "  ".to_string()));
        assert_eq!(config.graphql_endpoint, DEFAULT_GRAPHQL_ENDPOINT);
    }
}
