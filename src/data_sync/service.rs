use crate::data_sync::{
    api::MarketApi,
    cache_store::{CacheRead, CacheStats, CacheStore},
    config::DataSyncConfig,
    coordinator::RequestCoordinator,
    persistent::{Dataset, DurableStorage, FileStorage, PersistentCache},
    phased_loader::PhasedLoader,
    prefetch::PrefetchScheduler,
    search_history::SearchHistory,
    search_index::{SearchHit, SearchIndex},
};
use crate::error::SyncResult;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::model::{market, MarketDetail, MarketSummary, SearchHistoryItem, Timeframe};
use crate::utils::clock::{Clock, SystemClock};
use eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

/// What a warm start restored from durable snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmStartReport {
    /// Markets loaded into the search index from the catalog snapshot.
    pub catalog_markets: usize,
    pub lists: Vec<Timeframe>,
}

/// Main data synchronization service
///
/// Owns one instance of every shared piece (cache, in-flight registry,
/// durable snapshots, search catalog, prefetch record) and hands out the
/// loaders built on top of them. Time and storage are injected so tests can
/// run against a manual clock and an in-memory store.
pub struct DataSyncService {
    config: DataSyncConfig,
    clock: Arc<dyn Clock>,
    cache: Arc<CacheStore<Value>>,
    persistent: Arc<PersistentCache>,
    index: Arc<SearchIndex>,
    history: SearchHistory,
    api: Arc<MarketApi>,
    prefetcher: PrefetchScheduler,
    loader: Arc<PhasedLoader>,
}

impl DataSyncService {
    pub fn builder(config: DataSyncConfig) -> DataSyncServiceBuilder {
        DataSyncServiceBuilder::new(config)
    }

    /// Create a service talking to the configured upstream, snapshotting to disk
    pub fn new(config: DataSyncConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &DataSyncConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn api(&self) -> &Arc<MarketApi> {
        &self.api
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    pub fn prefetcher(&self) -> &PrefetchScheduler {
        &self.prefetcher
    }

    pub fn loader(&self) -> Arc<PhasedLoader> {
        Arc::clone(&self.loader)
    }

    pub fn persistent(&self) -> &Arc<PersistentCache> {
        &self.persistent
    }

    pub fn cache_stats(&self) -> &CacheStats {
        &self.cache.stats
    }

    /// Restore the catalog and every list timeframe from valid snapshots
    ///
    /// Restored entries keep their original age, so anything past its cache
    /// TTL is served once and then revalidated in the background.
    pub fn warm_start(&self) -> WarmStartReport {
        let mut report = WarmStartReport::default();

        if self.api.warm_start(&Dataset::AllMarkets) {
            let key = self.api.all_markets_request().cache_key();
            match self.api.coordinator().peek(&key) {
                Ok(read) => report.catalog_markets = self.install_catalog(read),
                Err(e) => debug!("catalog snapshot vanished before indexing: {}", e),
            }
        }

        for timeframe in Timeframe::iter() {
            if self.api.warm_start(&Dataset::MarketList(timeframe)) {
                report.lists.push(timeframe);
            }
        }

        info!(
            "Warm start restored {} catalog markets and {} market lists",
            report.catalog_markets,
            report.lists.len()
        );
        report
    }

    fn install_catalog(&self, read: CacheRead<Value>) -> usize {
        match market::parse_summaries(&read.data) {
            Ok(markets) => {
                let count = markets.len();
                self.index.replace_catalog(markets);
                count
            }
            Err(e) => {
                warn!("Failed to decode catalog for search: {}", e);
                0
            }
        }
    }

    /// Resolve the full active catalog for search
    ///
    /// Every completed catalog fetch replaces the index wholesale from inside
    /// the fetch itself, so a stale read only schedules the swap. A cached
    /// catalog is installed here when the index is still empty.
    pub async fn refresh_catalog(&self) -> SyncResult<usize> {
        let read = self.api.all_active_markets().await?;
        let is_stale = read.is_stale;
        self.index.install_if_empty(read.into_data());
        debug!(markets = self.index.len(), is_stale, "catalog ready for search");
        Ok(self.index.len())
    }

    /// Synchronous search over the cached catalog
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        self.index.search(query, limit)
    }

    /// Local search, falling back to the upstream search when the catalog
    /// has nothing; upstream hits are merged with local ones and re-ranked.
    pub async fn search_with_fallback(&self, query: &str, limit: usize) -> SyncResult<Vec<SearchHit>> {
        let local = self.index.search(query, limit);
        if !local.is_empty() || query.trim().is_empty() {
            return Ok(local);
        }

        debug!(query = %query, "no local hits, asking upstream");
        let remote = self.api.upstream_search(query).await?;
        Ok(SearchIndex::merge_ranked(query, local, remote, limit))
    }

    pub fn record_search(&self, market: &MarketSummary) {
        self.history.add(market);
    }

    pub fn search_history(&self) -> Vec<SearchHistoryItem> {
        self.history.items()
    }

    pub fn history(&self) -> &SearchHistory {
        &self.history
    }

    pub async fn market_list(&self, timeframe: Timeframe) -> SyncResult<CacheRead<Vec<MarketSummary>>> {
        self.api.market_list(timeframe).await
    }

    pub async fn market_detail(&self, id: &str) -> SyncResult<CacheRead<MarketDetail>> {
        self.restore_detail(id);
        self.api.market_detail(id).await
    }

    /// Open `id` in the detail loader, restoring its detail snapshot first
    /// when nothing is cached for it yet.
    pub async fn open_market(&self, id: &str) -> bool {
        self.restore_detail(id);
        self.loader.open(id).await
    }

    fn restore_detail(&self, id: &str) {
        let key = self.api.detail_request(id).cache_key();
        if self.cache.entry(&key).is_none() && self.api.warm_start(&Dataset::MarketDetail(id.to_string())) {
            debug!(id = %id, "detail restored from snapshot");
        }
    }

    /// Drop the cached detail of `id` and its prefetch mark, so the next
    /// view or hover goes back to the network.
    pub fn refresh_market(&self, id: &str) {
        self.api.coordinator().invalidate(&self.api.detail_request(id).cache_key());
        self.prefetcher.invalidate(id);
    }

    /// Clear the in-memory cache and every prefetch mark
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.prefetcher.clear();
        info!("In-memory cache and prefetch record cleared");
    }
}

/// Assembles a [`DataSyncService`]; anything not injected is built from config.
pub struct DataSyncServiceBuilder {
    config: DataSyncConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    storage: Option<Arc<dyn DurableStorage>>,
    clock: Option<Arc<dyn Clock>>,
}

impl DataSyncServiceBuilder {
    pub fn new(config: DataSyncConfig) -> Self {
        Self { config, fetcher: None, storage: None, clock: None }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn DurableStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<DataSyncService> {
        let config = self.config;
        config.validate()?;

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(&config)?),
        };
        let storage: Arc<dyn DurableStorage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(
                FileStorage::new(&config.storage_dir)
                    .map_err(|e| eyre::eyre!("Failed to open storage dir {}: {}", config.storage_dir, e))?,
            ),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let cache = Arc::new(CacheStore::new(Arc::clone(&clock), config.cache_capacity));
        let coordinator = Arc::new(RequestCoordinator::new(Arc::clone(&cache), config.request_timeout()));
        let persistent = Arc::new(PersistentCache::new(storage, Arc::clone(&clock), config.snapshot_ttl.clone()));
        let index = Arc::new(SearchIndex::new());
        let api = Arc::new(
            MarketApi::new(coordinator, fetcher, Arc::clone(&persistent), &config).with_search_index(Arc::clone(&index)),
        );
        let history = SearchHistory::load(Arc::clone(&persistent), Arc::clone(&clock), config.search_history_limit);
        let prefetcher = PrefetchScheduler::new(Arc::clone(&api));
        let loader = Arc::new(PhasedLoader::new(Arc::clone(&api), Arc::clone(&index)));

        info!(
            "DataSyncService ready (cache capacity {}, {} search history items)",
            config.cache_capacity,
            history.len()
        );

        Ok(DataSyncService {
            config,
            clock,
            cache,
            persistent,
            index,
            history,
            api,
            prefetcher,
            loader,
        })
    }
}
