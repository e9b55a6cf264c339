use crate::utils::config_loader::{
    load_from_file, load_from_file_sync, LoadConfigError, SyncConfigLoader, SyncConfigLoaderSync,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// In-memory cache lifetimes per dataset, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtls {
    pub order_book_secs: u64,
    pub listing_secs: u64,
    pub detail_secs: u64,
    pub trades_secs: u64,
    /// Holders, top traders, trader counts.
    pub activity_secs: u64,
    pub price_history_secs: u64,
    /// Full catalog snapshot backing search.
    pub catalog_secs: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            order_book_secs: 5,
            listing_secs: 15,
            detail_secs: 60,
            trades_secs: 30,
            activity_secs: 60,
            price_history_secs: 60,
            catalog_secs: 30 * 60,
        }
    }
}

/// Validity windows of the durable snapshots, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotTtls {
    pub market_list_secs: u64,
    pub all_markets_secs: u64,
    pub market_detail_secs: u64,
    pub search_history_secs: u64,
}

impl Default for SnapshotTtls {
    fn default() -> Self {
        Self {
            market_list_secs: 10 * 60,
            all_markets_secs: 2 * 60 * 60,
            market_detail_secs: 30 * 60,
            search_history_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Configuration for the data synchronization layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSyncConfig {
    /// Catalog/listing namespace base URL
    pub catalog_base_url: String,
    /// Order-book/pricing namespace base URL
    pub clob_base_url: String,
    /// Portfolio/activity namespace base URL
    pub data_base_url: String,
    /// Egress proxies rotated round-robin; empty means direct
    pub egress_proxies: Vec<String>,
    /// Fixed per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Retry hint used when a 429 carries no Retry-After header
    pub rate_limit_retry_secs: u64,
    /// Upper bound on in-memory cache entries
    pub cache_capacity: usize,
    /// Most-recent searches kept
    pub search_history_limit: usize,
    /// Results requested from the upstream search fallback
    pub upstream_search_limit: u32,
    /// Page size of the full-catalog fetch
    pub catalog_page_size: u32,
    /// Directory for durable snapshots
    pub storage_dir: String,
    pub ttl: CacheTtls,
    pub snapshot_ttl: SnapshotTtls,
}

impl Default for DataSyncConfig {
    fn default() -> Self {
        Self {
            catalog_base_url: "https://gamma-api.polymarket.com".to_string(),
            clob_base_url: "https://clob.polymarket.com".to_string(),
            data_base_url: "https://data-api.polymarket.com".to_string(),
            egress_proxies: Vec::new(),
            request_timeout_secs: 30,
            rate_limit_retry_secs: 10,
            cache_capacity: 2_000,
            search_history_limit: 10,
            upstream_search_limit: 20,
            catalog_page_size: 500,
            storage_dir: ".market-sync".to_string(),
            ttl: CacheTtls::default(),
            snapshot_ttl: SnapshotTtls::default(),
        }
    }
}

fn parse_url_var(name: &str, value: String) -> eyre::Result<String> {
    Url::parse(&value).map_err(|e| eyre::eyre!("Invalid {}: {}", name, e))?;
    Ok(value)
}

impl DataSyncConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> eyre::Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CATALOG_BASE_URL") {
            config.catalog_base_url = parse_url_var("CATALOG_BASE_URL", url)?;
        }

        if let Ok(url) = std::env::var("CLOB_BASE_URL") {
            config.clob_base_url = parse_url_var("CLOB_BASE_URL", url)?;
        }

        if let Ok(url) = std::env::var("DATA_BASE_URL") {
            config.data_base_url = parse_url_var("DATA_BASE_URL", url)?;
        }

        if let Ok(proxies) = std::env::var("EGRESS_PROXIES") {
            config.egress_proxies = proxies
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| parse_url_var("EGRESS_PROXIES", p.to_string()))
                .collect::<eyre::Result<_>>()?;
        }

        if let Ok(timeout_str) = std::env::var("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = timeout_str.parse()
                .map_err(|e| eyre::eyre!("Invalid REQUEST_TIMEOUT_SECS: {}", e))?;
        }

        if let Ok(capacity_str) = std::env::var("CACHE_CAPACITY") {
            config.cache_capacity = capacity_str.parse()
                .map_err(|e| eyre::eyre!("Invalid CACHE_CAPACITY: {}", e))?;
        }

        if let Ok(limit_str) = std::env::var("SEARCH_HISTORY_LIMIT") {
            config.search_history_limit = limit_str.parse()
                .map_err(|e| eyre::eyre!("Invalid SEARCH_HISTORY_LIMIT: {}", e))?;
        }

        if let Ok(dir) = std::env::var("STORAGE_DIR") {
            config.storage_dir = dir;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(eyre::eyre!("request_timeout_secs must be positive"));
        }
        if self.cache_capacity == 0 {
            return Err(eyre::eyre!("cache_capacity must be positive"));
        }
        if self.search_history_limit == 0 {
            return Err(eyre::eyre!("search_history_limit must be positive"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_retry(&self) -> Duration {
        Duration::from_secs(self.rate_limit_retry_secs)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct DataSyncConfigRoot {
    pub sync: DataSyncConfig,
}

#[async_trait]
impl SyncConfigLoader for DataSyncConfig {
    type SectionType = DataSyncConfig;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: DataSyncConfigRoot = load_from_file(file_name).await?;
        root.sync.validate().map_err(|e| LoadConfigError::ConfigError(e.to_string()))?;
        Ok(root.sync)
    }
}

impl SyncConfigLoaderSync for DataSyncConfig {
    type SectionType = DataSyncConfig;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: DataSyncConfigRoot = load_from_file_sync(file_name)?;
        root.sync.validate().map_err(|e| LoadConfigError::ConfigError(e.to_string()))?;
        Ok(root.sync)
    }
}
