//! Typed endpoints over the request coordinator.
//!
//! Raw upstream JSON is what gets cached, deduplicated and snapshotted; every
//! endpoint decodes its own record type on the way out. Each endpoint owns a
//! cache key (derived from its [`Request`]) and a TTL from [`CacheTtls`].

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::cache_store::CacheRead;
use super::config::{CacheTtls, DataSyncConfig};
use super::coordinator::RequestCoordinator;
use super::persistent::{Dataset, PersistentCache};
use super::search_index::SearchIndex;
use crate::error::SyncResult;
use crate::fetch::{Fetcher, Namespace, Request};
use crate::model::{
    activity, market, Holder, MarketDetail, MarketShell, MarketSummary, OrderBook, OutcomeDetail, OutcomesList,
    PricePoint, Timeframe, TopTrader, Trade,
};

const LIST_PAGE_SIZE: u32 = 50;
const TRADES_LIMIT: u32 = 50;
const HOLDERS_LIMIT: u32 = 20;
const TOP_TRADERS_LIMIT: u32 = 10;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn decode<T>(read: CacheRead<Value>, parse: impl FnOnce(&Value) -> SyncResult<T>) -> SyncResult<CacheRead<T>> {
    let data = parse(&read.data)?;
    Ok(CacheRead { data, is_stale: read.is_stale, fetched_at: read.fetched_at })
}

pub struct MarketApi {
    coordinator: Arc<RequestCoordinator<Value>>,
    fetcher: Arc<dyn Fetcher>,
    persistent: Arc<PersistentCache>,
    ttl: CacheTtls,
    catalog_page_size: u32,
    upstream_search_limit: u32,
    // receives every completed catalog fetch, foreground or background
    catalog_index: Option<Arc<SearchIndex>>,
}

impl MarketApi {
    pub fn new(
        coordinator: Arc<RequestCoordinator<Value>>,
        fetcher: Arc<dyn Fetcher>,
        persistent: Arc<PersistentCache>,
        config: &DataSyncConfig,
    ) -> Self {
        Self {
            coordinator,
            fetcher,
            persistent,
            ttl: config.ttl.clone(),
            catalog_page_size: config.catalog_page_size,
            upstream_search_limit: config.upstream_search_limit,
            catalog_index: None,
        }
    }

    /// Installs every completed catalog fetch into `index`, including
    /// background revalidations nobody awaits.
    pub fn with_search_index(mut self, index: Arc<SearchIndex>) -> Self {
        self.catalog_index = Some(index);
        self
    }

    pub fn coordinator(&self) -> &Arc<RequestCoordinator<Value>> {
        &self.coordinator
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttl
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    pub fn market_list_request(&self, timeframe: Timeframe) -> Request {
        Request::new(Namespace::Catalog, "/markets")
            .param("active", true)
            .param("closed", false)
            .param("limit", LIST_PAGE_SIZE)
            .param("order", timeframe.order_field())
            .param("ascending", false)
    }

    pub fn all_markets_request(&self) -> Request {
        Request::new(Namespace::Catalog, "/markets")
            .param("active", true)
            .param("closed", false)
            .param("limit", self.catalog_page_size)
            .param("order", Timeframe::All.order_field())
            .param("ascending", false)
    }

    pub fn detail_request(&self, id: &str) -> Request {
        Request::new(Namespace::Catalog, format!("/markets/{id}"))
    }

    pub fn event_request(&self, market_id: &str) -> Request {
        Request::new(Namespace::Catalog, "/events").param("market", market_id)
    }

    pub fn price_history_request(&self, token_id: &str) -> Request {
        Request::new(Namespace::Clob, "/prices-history")
            .param("market", token_id)
            .param("interval", "max")
    }

    pub fn trades_request(&self, condition_id: &str) -> Request {
        Request::new(Namespace::Data, "/trades")
            .param("market", condition_id)
            .param("limit", TRADES_LIMIT)
    }

    pub fn trader_count_request(&self, condition_id: &str) -> Request {
        Request::new(Namespace::Data, "/traders/count").param("market", condition_id)
    }

    pub fn holders_request(&self, condition_id: &str) -> Request {
        Request::new(Namespace::Data, "/holders")
            .param("market", condition_id)
            .param("limit", HOLDERS_LIMIT)
    }

    pub fn top_traders_request(&self, condition_id: &str) -> Request {
        Request::new(Namespace::Data, "/leaderboard")
            .param("market", condition_id)
            .param("limit", TOP_TRADERS_LIMIT)
    }

    pub fn order_book_request(&self, token_id: &str) -> Request {
        Request::new(Namespace::Clob, "/book").param("token_id", token_id)
    }

    pub fn search_request(&self, query: &str) -> Request {
        Request::new(Namespace::Catalog, "/public-search")
            .param("q", query.trim())
            .param("limit_per_type", self.upstream_search_limit)
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolves `request` through the coordinator. When `dataset` is set, every
    /// successful upstream response is also written as a durable snapshot.
    async fn call(&self, request: Request, ttl: Duration, dataset: Option<Dataset>) -> SyncResult<CacheRead<Value>> {
        self.call_then(request, ttl, dataset, |_| {}).await
    }

    /// Like `call`, running `on_fetched` on every successful upstream response
    /// before it is cached.
    async fn call_then<H>(
        &self,
        request: Request,
        ttl: Duration,
        dataset: Option<Dataset>,
        on_fetched: H,
    ) -> SyncResult<CacheRead<Value>>
    where
        H: FnOnce(&Value) + Send + 'static,
    {
        let key = request.cache_key();
        let fetcher = Arc::clone(&self.fetcher);
        let persistent = Arc::clone(&self.persistent);
        self.coordinator
            .resolve(&key, ttl, move || async move {
                let value = fetcher.fetch(&request).await?;
                if let Some(dataset) = dataset {
                    if let Err(e) = persistent.store(&dataset, &value) {
                        warn!(dataset = %dataset.storage_key(), error = %e, "failed to write snapshot");
                    }
                }
                on_fetched(&value);
                Ok(value)
            })
            .await
    }

    pub async fn market_list(&self, timeframe: Timeframe) -> SyncResult<CacheRead<Vec<MarketSummary>>> {
        let read = self
            .call(self.market_list_request(timeframe), secs(self.ttl.listing_secs), Some(Dataset::MarketList(timeframe)))
            .await?;
        decode(read, market::parse_summaries)
    }

    /// Full active catalog that backs search.
    pub async fn all_active_markets(&self) -> SyncResult<CacheRead<Vec<MarketSummary>>> {
        let index = self.catalog_index.clone();
        let read = self
            .call_then(
                self.all_markets_request(),
                secs(self.ttl.catalog_secs),
                Some(Dataset::AllMarkets),
                move |value| {
                    let Some(index) = index else { return };
                    match market::parse_summaries(value) {
                        Ok(markets) => index.replace_catalog(markets),
                        Err(e) => warn!(error = %e, "fetched catalog not indexed"),
                    }
                },
            )
            .await?;
        decode(read, market::parse_summaries)
    }

    pub async fn market_detail(&self, id: &str) -> SyncResult<CacheRead<MarketDetail>> {
        let read = self
            .call(self.detail_request(id), secs(self.ttl.detail_secs), Some(Dataset::MarketDetail(id.to_string())))
            .await?;
        decode(read, market::parse_detail)
    }

    pub async fn event_outcomes(&self, market_id: &str) -> SyncResult<CacheRead<OutcomesList>> {
        let read = self.call(self.event_request(market_id), secs(self.ttl.detail_secs), None).await?;
        decode(read, market::parse_outcomes_list)
    }

    /// Priced detail of one outcome; shares the cache entry of its market's detail.
    pub async fn outcome_detail(&self, market_id: &str, label: &str) -> SyncResult<CacheRead<OutcomeDetail>> {
        let read = self
            .call(
                self.detail_request(market_id),
                secs(self.ttl.detail_secs),
                Some(Dataset::MarketDetail(market_id.to_string())),
            )
            .await?;
        decode(read, |value| market::parse_outcome_detail(value, label))
    }

    pub async fn price_history(&self, token_id: &str) -> SyncResult<CacheRead<Vec<PricePoint>>> {
        let read = self
            .call(self.price_history_request(token_id), secs(self.ttl.price_history_secs), None)
            .await?;
        decode(read, activity::parse_price_history)
    }

    pub async fn trades(&self, condition_id: &str) -> SyncResult<CacheRead<Vec<Trade>>> {
        let read = self.call(self.trades_request(condition_id), secs(self.ttl.trades_secs), None).await?;
        decode(read, activity::parse_trades)
    }

    pub async fn trader_count(&self, condition_id: &str) -> SyncResult<CacheRead<u64>> {
        let read = self
            .call(self.trader_count_request(condition_id), secs(self.ttl.activity_secs), None)
            .await?;
        decode(read, activity::parse_trader_count)
    }

    pub async fn top_holders(&self, condition_id: &str) -> SyncResult<CacheRead<Vec<Holder>>> {
        let read = self.call(self.holders_request(condition_id), secs(self.ttl.activity_secs), None).await?;
        decode(read, activity::parse_holders)
    }

    pub async fn top_traders(&self, condition_id: &str) -> SyncResult<CacheRead<Vec<TopTrader>>> {
        let read = self
            .call(self.top_traders_request(condition_id), secs(self.ttl.activity_secs), None)
            .await?;
        decode(read, activity::parse_top_traders)
    }

    pub async fn order_book(&self, token_id: &str) -> SyncResult<CacheRead<OrderBook>> {
        let read = self.call(self.order_book_request(token_id), secs(self.ttl.order_book_secs), None).await?;
        decode(read, activity::parse_order_book)
    }

    pub async fn upstream_search(&self, query: &str) -> SyncResult<Vec<MarketSummary>> {
        let read = self.call(self.search_request(query), secs(self.ttl.listing_secs), None).await?;
        market::parse_search_response(&read.data)
    }

    /// Shell from an already cached detail, no network.
    pub fn cached_shell(&self, id: &str) -> Option<MarketShell> {
        let read = self.coordinator.peek(&self.detail_request(id).cache_key()).ok()?;
        market::parse_detail(&read.data).ok().map(|detail| detail.shell())
    }

    /// Restores the snapshot of `dataset` into the cache. Only datasets backed
    /// by an endpoint are restorable.
    pub fn warm_start(&self, dataset: &Dataset) -> bool {
        let (request, ttl) = match dataset {
            Dataset::MarketList(tf) => (self.market_list_request(*tf), self.ttl.listing_secs),
            Dataset::AllMarkets => (self.all_markets_request(), self.ttl.catalog_secs),
            Dataset::MarketDetail(id) => (self.detail_request(id), self.ttl.detail_secs),
            Dataset::SearchHistory => return false,
        };
        self.persistent
            .warm_start(dataset, self.coordinator.cache(), &request.cache_key(), secs(ttl))
    }
}
