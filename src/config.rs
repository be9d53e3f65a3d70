//! Node configuration and the persisted preferences file.
//!
//! Values are layered: built-in defaults, then the preferences file, then
//! command line flags. The resolved [`NodeConfig`] is passed explicitly to
//! every component that needs it.

use crate::chain::ChainId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_CHAIN_ID: ChainId = 1;
pub const DEFAULT_AUTHORITY_ADDRESS: &str = "http://127.0.0.1:8000";
pub const DEFAULT_NFT_STORAGE_ADDRESS: &str = "http://127.0.0.1:8080";
pub const DEFAULT_RPC_ADDRESS: &str = "127.0.0.1:2000";
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Preferences parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for the database.
    pub data_dir: PathBuf,
    pub chain_id: ChainId,
    /// Base URL of the authority.
    pub authority_address: String,
    /// Base URL of the NFT metadata storage gateway.
    pub nft_storage_address: String,
    /// Local RPC listen address.
    pub rpc_address: String,
    /// Timeout for one-shot authority and NFT storage requests.
    pub request_timeout: Duration,
    /// Fixed delay before resubscribing after a gateway timeout.
    pub gateway_timeout_backoff: Duration,
    /// Delay before the daemon restarts a failed sync manager.
    pub restart_delay: Duration,
    /// Maximum number of blocks fetched by one catch-up walk.
    pub catch_up_limit: usize,
    /// Backoff for transient subscription failures.
    pub retry: RetryConfig,
}

impl NodeConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            chain_id: DEFAULT_CHAIN_ID,
            authority_address: DEFAULT_AUTHORITY_ADDRESS.to_string(),
            nft_storage_address: DEFAULT_NFT_STORAGE_ADDRESS.to_string(),
            rpc_address: DEFAULT_RPC_ADDRESS.to_string(),
            request_timeout: Duration::from_secs(30),
            gateway_timeout_backoff: Duration::from_secs(10),
            restart_delay: Duration::from_secs(5),
            catch_up_limit: 10_000,
            retry: RetryConfig::default(),
        }
    }

    /// Build a configuration from layered preferences.
    pub fn from_preferences(preferences: &Preferences) -> Self {
        let mut config = Self::new(
            preferences
                .data_dir
                .clone()
                .unwrap_or_else(default_data_dir),
        );
        if let Some(chain_id) = preferences.chain_id {
            config.chain_id = chain_id;
        }
        if let Some(address) = &preferences.authority_address {
            config.authority_address = address.clone();
        }
        if let Some(address) = &preferences.nft_storage_address {
            config.nft_storage_address = address.clone();
        }
        if let Some(address) = &preferences.rpc_address {
            config.rpc_address = address.clone();
        }
        config
    }

    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn with_authority_address(mut self, address: impl Into<String>) -> Self {
        self.authority_address = address.into();
        self
    }

    pub fn with_nft_storage_address(mut self, address: impl Into<String>) -> Self {
        self.nft_storage_address = address.into();
        self
    }

    pub fn with_rpc_address(mut self, address: impl Into<String>) -> Self {
        self.rpc_address = address.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_gateway_timeout_backoff(mut self, delay: Duration) -> Self {
        self.gateway_timeout_backoff = delay;
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn with_catch_up_limit(mut self, limit: usize) -> Self {
        self.catch_up_limit = limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Exponential backoff settings for resubscription.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl RetryConfig {
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// A fresh backoff that never gives up.
    pub fn backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Locally persisted defaults for command line flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub data_dir: Option<PathBuf>,
    pub chain_id: Option<ChainId>,
    pub authority_address: Option<String>,
    pub nft_storage_address: Option<String>,
    pub rpc_address: Option<String>,
}

impl Preferences {
    /// Load preferences; a missing file yields empty preferences.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No preferences file at {:?}", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Saved preferences to {:?}", path);
        Ok(())
    }

    /// Values set in `overrides` win over values in `self`.
    pub fn overlay(self, overrides: Preferences) -> Preferences {
        Preferences {
            data_dir: overrides.data_dir.or(self.data_dir),
            chain_id: overrides.chain_id.or(self.chain_id),
            authority_address: overrides.authority_address.or(self.authority_address),
            nft_storage_address: overrides.nft_storage_address.or(self.nft_storage_address),
            rpc_address: overrides.rpc_address.or(self.rpc_address),
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_data_dir() -> PathBuf {
    home_dir().join(".chain-state-sync")
}

pub fn default_preferences_path() -> PathBuf {
    default_data_dir().join("preferences.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::new("/tmp/node");
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.rpc_address, "127.0.0.1:2000");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.gateway_timeout_backoff, Duration::from_secs(10));
    }

    #[test]
    fn flags_override_preferences() {
        let saved = Preferences {
            chain_id: Some(7),
            authority_address: Some("http://saved:1".into()),
            ..Default::default()
        };
        let flags = Preferences {
            authority_address: Some("http://flag:2".into()),
            ..Default::default()
        };
        let config = NodeConfig::from_preferences(&saved.overlay(flags));
        assert_eq!(config.chain_id, 7);
        assert_eq!(config.authority_address, "http://flag:2");
        assert_eq!(config.nft_storage_address, DEFAULT_NFT_STORAGE_ADDRESS);
    }

    #[test]
    fn preferences_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.json");
        assert_eq!(Preferences::load(&path).unwrap(), Preferences::default());

        let prefs = Preferences {
            data_dir: Some(dir.path().to_path_buf()),
            rpc_address: Some("127.0.0.1:3000".into()),
            ..Default::default()
        };
        prefs.save(&path).unwrap();
        assert_eq!(Preferences::load(&path).unwrap(), prefs);
    }

    #[test]
    fn partial_preferences_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, r#"{"chain_id": 3}"#).unwrap();
        assert_eq!(Preferences::load(&path).unwrap().chain_id, Some(3));
    }
}
