/// Sync daemon configuration
///
/// Controls the Bitcoin network, the node endpoint, scan batch sizes and the
/// timing of the periodic sync loop. Defaults to Signet.
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

const DEFAULT_RECENT_BATCH_SIZE: u32 = 1000;
const DEFAULT_FAR_BATCH_SIZE: u32 = 100;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 16;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Bitcoin network type (for address encoding)
    pub network: bitcoin::Network,
    /// Esplora API base URL
    pub esplora_url: String,
    /// Directory holding keys.json and indices.json
    pub data_dir: PathBuf,
    /// Number of indices per recent-address scan batch
    pub recent_batch_size: u32,
    /// Number of indices explored by the far-address scan per tick
    pub far_batch_size: u32,
    /// Period of the scan loop
    pub sync_interval: Duration,
    /// Upper bound for every remote call
    pub request_timeout: Duration,
    /// How often the Esplora notification poller diffs UTXOs
    pub notification_poll_interval: Duration,
    /// Cap on in-flight HTTP requests per node call
    pub max_concurrent_requests: usize,
}

/// On-disk shape of the config file. Every field is optional and falls back
/// to the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    network: Option<String>,
    esplora_url: Option<String>,
    data_dir: Option<PathBuf>,
    recent_batch_size: Option<u32>,
    far_batch_size: Option<u32>,
    sync_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    notification_poll_secs: Option<u64>,
    max_concurrent_requests: Option<usize>,
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BITCOIN_NETWORK`: "signet" (default), "regtest", "testnet" or "bitcoin"
    /// - `ESPLORA_URL`: Esplora API endpoint (optional, has sensible defaults)
    /// - `WALLET_DATA_DIR`: directory with keys.json / indices.json
    /// - `RECENT_SCAN_BATCH`, `FAR_SCAN_BATCH`: scan batch sizes
    /// - `SYNC_INTERVAL_SECS`, `REQUEST_TIMEOUT_SECS`, `NOTIFICATION_POLL_SECS`
    /// - `MAX_CONCURRENT_REQUESTS`: in-flight request cap against the node
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML config file body. Environment variables are not consulted.
    pub fn from_toml_str(contents: &str) -> Result<Self, SyncError> {
        let file: FileConfig =
            toml::from_str(contents).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        let mut config = Self::default();
        if let Some(network) = file.network {
            config.network = parse_network(&network)?;
            config.esplora_url = default_esplora_url(config.network).to_string();
        }
        if let Some(url) = file.esplora_url {
            config.esplora_url = url;
        }
        if let Some(dir) = file.data_dir {
            config.data_dir = dir;
        }
        if let Some(batch) = file.recent_batch_size {
            config.recent_batch_size = batch;
        }
        if let Some(batch) = file.far_batch_size {
            config.far_batch_size = batch;
        }
        if let Some(secs) = file.sync_interval_secs {
            config.sync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.notification_poll_secs {
            config.notification_poll_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = file.max_concurrent_requests {
            config.max_concurrent_requests = limit;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file, then let environment variables override it.
    pub fn from_file(path: &Path) -> Result<Self, SyncError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.recent_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "recent_batch_size must be greater than zero".into(),
            ));
        }
        if self.far_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "far_batch_size must be greater than zero".into(),
            ));
        }
        if self.sync_interval.is_zero() || self.notification_poll_interval.is_zero() {
            return Err(SyncError::InvalidConfig("intervals must be non-zero".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "request_timeout must be non-zero".into(),
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(SyncError::InvalidConfig(
                "max_concurrent_requests must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(network_str) = env::var("BITCOIN_NETWORK") {
            match parse_network(&network_str) {
                Ok(network) => {
                    self.network = network;
                    self.esplora_url = default_esplora_url(network).to_string();
                }
                Err(_) => {
                    log::warn!("Unknown network '{}', keeping {}", network_str, self.network)
                }
            }
        }
        log::info!("Using {} network", self.network);

        if let Ok(url) = env::var("ESPLORA_URL") {
            self.esplora_url = url;
        }
        log::info!("Esplora URL: {}", self.esplora_url);

        if let Ok(dir) = env::var("WALLET_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(batch) = env_u32("RECENT_SCAN_BATCH") {
            self.recent_batch_size = batch;
        }
        if let Some(batch) = env_u32("FAR_SCAN_BATCH") {
            self.far_batch_size = batch;
        }
        if let Some(secs) = env_number("SYNC_INTERVAL_SECS") {
            self.sync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("REQUEST_TIMEOUT_SECS") {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("NOTIFICATION_POLL_SECS") {
            self.notification_poll_interval = Duration::from_secs(secs);
        }
        if let Some(limit) = env_number("MAX_CONCURRENT_REQUESTS") {
            match usize::try_from(limit) {
                Ok(limit) => self.max_concurrent_requests = limit,
                Err(_) => log::warn!("Ignoring MAX_CONCURRENT_REQUESTS={}: too large", limit),
            }
        }
    }
}

impl Default for SyncConfig {
    /// Default configuration (Signet)
    fn default() -> Self {
        Self {
            network: bitcoin::Network::Signet,
            esplora_url: default_esplora_url(bitcoin::Network::Signet).to_string(),
            data_dir: PathBuf::from("./wallet-data"),
            recent_batch_size: DEFAULT_RECENT_BATCH_SIZE,
            far_batch_size: DEFAULT_FAR_BATCH_SIZE,
            sync_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            notification_poll_interval: Duration::from_secs(5),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

fn parse_network(value: &str) -> Result<bitcoin::Network, SyncError> {
    match value.trim().to_lowercase().as_str() {
        "signet" | "" => Ok(bitcoin::Network::Signet),
        "regtest" => Ok(bitcoin::Network::Regtest),
        "testnet" => Ok(bitcoin::Network::Testnet),
        "bitcoin" | "mainnet" => Ok(bitcoin::Network::Bitcoin),
        other => Err(SyncError::InvalidConfig(format!("unknown network '{}'", other))),
    }
}

fn default_esplora_url(network: bitcoin::Network) -> &'static str {
    match network {
        bitcoin::Network::Regtest => "http://localhost:3000",
        bitcoin::Network::Testnet => "https://mempool.space/testnet/api",
        bitcoin::Network::Bitcoin => "https://mempool.space/api",
        _ => "https://mempool.space/signet/api",
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Ignoring {}={}: {}", key, raw, e);
            None
        }
    }
}

fn env_u32(key: &str) -> Option<u32> {
    let value = env_number(key)?;
    match u32::try_from(value) {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("Ignoring {}={}: exceeds {}", key, value, u32::MAX);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_signet() {
        let config = SyncConfig::default();
        assert!(matches!(config.network, bitcoin::Network::Signet));
        assert_eq!(config.esplora_url, "https://mempool.space/signet/api");
        assert_eq!(config.recent_batch_size, 1000);
        assert_eq!(config.far_batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
            network = "regtest"
            recent_batch_size = 50
            sync_interval_secs = 10
            "#,
        )
        .unwrap();

        assert!(matches!(config.network, bitcoin::Network::Regtest));
        assert_eq!(config.esplora_url, "http://localhost:3000");
        assert_eq!(config.recent_batch_size, 50);
        assert_eq!(config.far_batch_size, 100);
        assert_eq!(config.sync_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_batch_is_rejected() {
        let err = SyncConfig::from_toml_str("far_batch_size = 0").unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_oversized_batch_from_env_is_ignored() {
        env::set_var("WALLET_SYNC_TEST_OVERSIZED_BATCH", "4294967297");
        env::set_var("WALLET_SYNC_TEST_FITTING_BATCH", "4294967295");

        assert_eq!(env_u32("WALLET_SYNC_TEST_OVERSIZED_BATCH"), None);
        assert_eq!(env_u32("WALLET_SYNC_TEST_FITTING_BATCH"), Some(u32::MAX));
    }

    #[test]
    fn test_request_concurrency_limit() {
        assert_eq!(SyncConfig::default().max_concurrent_requests, 16);

        let config = SyncConfig::from_toml_str("max_concurrent_requests = 4").unwrap();
        assert_eq!(config.max_concurrent_requests, 4);

        let err = SyncConfig::from_toml_str("max_concurrent_requests = 0").unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_network_is_rejected() {
        assert!(SyncConfig::from_toml_str("network = \"dogecoin\"").is_err());
        assert!(SyncConfig::from_toml_str("unknown_key = 1").is_err());
    }
}
