//! Durable snapshots that survive a process restart.
//!
//! Each tracked dataset is written as an envelope `{ items, timestamp }` under
//! its own storage key and is only honoured inside that dataset's expiry
//! window. Nothing here feeds the in-memory cache on its own: restoring a
//! snapshot into a [`CacheStore`] is the explicit [`PersistentCache::warm_start`]
//! step.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::cache_store::CacheStore;
use super::config::SnapshotTtls;
use crate::error::{SyncError, SyncResult};
use crate::model::Timeframe;
use crate::utils::clock::Clock;

/// Key/value string storage, the local-storage equivalent.
pub trait DurableStorage: Debug + Send + Sync {
    fn read(&self, key: &str) -> SyncResult<Option<String>>;
    fn write(&self, key: &str, value: &str) -> SyncResult<()>;
    fn remove(&self, key: &str) -> SyncResult<()>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> SyncResult<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self { dir: dir.as_ref().to_path_buf() })
    }

    /// Form-urlencoded key, so distinct keys never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl DurableStorage for FileStorage {
    fn read(&self, key: &str) -> SyncResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> SyncResult<()> {
        let path = self.path_for(key);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStorage for MemoryStorage {
    fn read(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.items.get(key).map(|v| v.clone()))
    }

    fn write(&self, key: &str, value: &str) -> SyncResult<()> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.items.remove(key);
        Ok(())
    }
}

/// Datasets tracked independently, each with its own expiry window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dataset {
    MarketList(Timeframe),
    AllMarkets,
    MarketDetail(String),
    SearchHistory,
}

impl Dataset {
    pub fn storage_key(&self) -> String {
        match self {
            Dataset::MarketList(tf) => format!("markets:list:{tf}"),
            Dataset::AllMarkets => "markets:all".to_string(),
            Dataset::MarketDetail(id) => format!("markets:detail:{id}"),
            Dataset::SearchHistory => "search:history".to_string(),
        }
    }

    pub fn ttl(&self, ttls: &SnapshotTtls) -> Duration {
        let secs = match self {
            Dataset::MarketList(_) => ttls.market_list_secs,
            Dataset::AllMarkets => ttls.all_markets_secs,
            Dataset::MarketDetail(_) => ttls.market_detail_secs,
            Dataset::SearchHistory => ttls.search_history_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub items: T,
    pub timestamp: u64,
}

#[derive(Debug)]
pub struct PersistentCache {
    storage: Arc<dyn DurableStorage>,
    clock: Arc<dyn Clock>,
    ttls: SnapshotTtls,
}

impl PersistentCache {
    pub fn new(storage: Arc<dyn DurableStorage>, clock: Arc<dyn Clock>, ttls: SnapshotTtls) -> Self {
        Self { storage, clock, ttls }
    }

    pub fn ttl(&self, dataset: &Dataset) -> Duration {
        dataset.ttl(&self.ttls)
    }

    /// Valid snapshot for `dataset`, or `None` when absent, expired or unreadable.
    pub fn load<T: DeserializeOwned>(&self, dataset: &Dataset) -> Option<Envelope<T>> {
        let key = dataset.storage_key();
        let raw = match self.storage.read(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to read snapshot");
                return None;
            }
        };
        let envelope: Envelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = %key, error = %e, "discarding corrupt snapshot");
                return None;
            }
        };

        let age_ms = self.clock.now_ms().saturating_sub(envelope.timestamp);
        if u128::from(age_ms) >= self.ttl(dataset).as_millis() {
            debug!(key = %key, age_ms, "snapshot expired");
            return None;
        }
        Some(envelope)
    }

    /// Writes a fresh envelope stamped with the current time.
    pub fn store<T: Serialize>(&self, dataset: &Dataset, items: &T) -> SyncResult<()> {
        let envelope = Envelope { items, timestamp: self.clock.now_ms() };
        let raw = serde_json::to_string(&envelope).map_err(SyncError::storage)?;
        self.storage.write(&dataset.storage_key(), &raw)
    }

    pub fn remove(&self, dataset: &Dataset) -> SyncResult<()> {
        self.storage.remove(&dataset.storage_key())
    }

    /// Restores a valid snapshot into `cache` under `cache_key`, keeping its
    /// original write time so staleness reflects the snapshot's real age.
    pub fn warm_start<T>(&self, dataset: &Dataset, cache: &CacheStore<T>, cache_key: &str, cache_ttl: Duration) -> bool
    where
        T: Clone + DeserializeOwned,
    {
        match self.load::<T>(dataset) {
            Some(envelope) => {
                cache.restore(cache_key, envelope.items, envelope.timestamp, cache_ttl);
                debug!(dataset = %dataset.storage_key(), cache_key = %cache_key, "warm start from snapshot");
                true
            }
            None => false,
        }
    }
}
