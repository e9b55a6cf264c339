/// Integration tests for the data synchronization layer
///
/// These run the whole service against a scripted fetcher, an in-memory
/// durable store and a manual clock, with tokio time paused so upstream
/// delays are deterministic.

#[cfg(test)]
mod integration_tests {
    use super::super::*;
    use crate::error::SyncError;
    use crate::fetch::mock::MockFetcher;
    use crate::fetch::Namespace;
    use crate::model::{MarketSummary, Timeframe};
    use crate::utils::clock::{Clock, ManualClock};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::time::Duration;

    struct Fixture {
        clock: Arc<ManualClock>,
        fetcher: Arc<MockFetcher>,
        storage: Arc<MemoryStorage>,
        service: DataSyncService,
    }

    fn service_with(clock: Arc<ManualClock>, fetcher: Arc<MockFetcher>, storage: Arc<MemoryStorage>) -> DataSyncService {
        DataSyncService::builder(DataSyncConfig::default())
            .fetcher(fetcher)
            .storage(storage)
            .clock(clock)
            .build()
            .unwrap()
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let fetcher = Arc::new(MockFetcher::new());
        let storage = Arc::new(MemoryStorage::new());
        let service = service_with(clock.clone(), fetcher.clone(), storage.clone());
        Fixture { clock, fetcher, storage, service }
    }

    fn market_json(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "question": title,
            "outcomes": ["Yes", "No"],
            "outcomePrices": ["0.55", "0.45"],
            "clobTokenIds": [format!("tok-{id}")],
            "conditionId": format!("0x{id}"),
            "volumeNum": 1000
        })
    }

    fn script_subresources(fetcher: &MockFetcher) {
        fetcher
            .respond(Namespace::Catalog, "/events", json!([{ "id": "e1", "title": "E", "markets": [] }]))
            .respond(Namespace::Data, "/trades", json!([]))
            .respond(Namespace::Data, "/traders/count", json!({ "count": 7 }))
            .respond(Namespace::Data, "/holders", json!([]))
            .respond(Namespace::Data, "/leaderboard", json!([]))
            .respond(Namespace::Clob, "/prices-history", json!({ "history": [] }))
            .respond(Namespace::Clob, "/book", json!({ "bids": [], "asks": [] }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_detail_requests_hit_upstream_once() {
        let f = fixture();
        f.fetcher
            .respond_after(Namespace::Catalog, "/markets/m1", Duration::from_millis(100), market_json("m1", "Will BTC reach 100k"));

        let (a, b) = tokio::join!(f.service.market_detail("m1"), f.service.market_detail("m1"));

        assert_eq!(f.fetcher.calls(Namespace::Catalog, "/markets/m1"), 1);
        assert_eq!(a.unwrap().data, b.unwrap().data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_runs_one_batch_per_id() {
        let f = fixture();
        f.fetcher
            .respond_after(Namespace::Catalog, "/markets/m1", Duration::from_millis(50), market_json("m1", "Q"));
        script_subresources(&f.fetcher);

        let batch = f.service.prefetcher().on_hover("m1").unwrap();
        assert!(f.service.prefetcher().on_hover("m1").is_none());
        batch.await.unwrap();
        let calls = f.fetcher.total_calls();
        assert_eq!(f.fetcher.calls(Namespace::Catalog, "/markets/m1"), 1);

        assert!(f.service.prefetcher().on_viewport_enter("m1").is_none());
        assert_eq!(f.fetcher.total_calls(), calls);

        // opening the prefetched market is served from cache
        assert!(f.service.open_market("m1").await);
        assert_eq!(f.fetcher.total_calls(), calls);
        assert_eq!(f.service.loader().view().phase, LoadPhase::SubresourcesResolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entity_switch_keeps_latest_market() {
        let f = fixture();
        f.fetcher
            .respond_after(Namespace::Catalog, "/markets/a", Duration::from_millis(300), market_json("a", "Slow A"))
            .respond_after(Namespace::Catalog, "/markets/b", Duration::from_millis(10), market_json("b", "Fast B"));
        script_subresources(&f.fetcher);
        let loader = f.service.loader();

        let (a_current, b_current) = tokio::join!(loader.open("a"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            loader.open("b").await
        });

        assert!(!a_current);
        assert!(b_current);
        let view = loader.view();
        assert_eq!(view.id.as_deref(), Some("b"));
        assert_eq!(view.detail.value().unwrap().id(), "b");
        assert_eq!(view.shell.unwrap().title, "Fast B");
        // the superseded load never reached its sub-resources
        assert_eq!(f.fetcher.calls(Namespace::Data, "/trades"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_catalog_snapshot_serves_search_without_network() {
        let f = fixture();
        f.service
            .persistent()
            .store(&Dataset::AllMarkets, &json!([market_json("m1", "Will BTC reach 100k")]))
            .unwrap();
        f.clock.advance(Duration::from_secs(60 * 60));

        let fresh = service_with(f.clock.clone(), f.fetcher.clone(), f.storage.clone());
        let report = fresh.warm_start();
        assert_eq!(report.catalog_markets, 1);
        assert!(report.lists.is_empty());

        let hits = fresh.search("btc", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].market.id, "m1");
        assert!(hits[0].score >= 10);
        assert_eq!(f.fetcher.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_snapshot_forces_live_fetch() {
        let f = fixture();
        f.service
            .persistent()
            .store(&Dataset::AllMarkets, &json!([market_json("old", "Old catalog")]))
            .unwrap();
        f.clock.advance(Duration::from_secs(2 * 60 * 60 + 1));
        f.fetcher.respond(Namespace::Catalog, "/markets", json!([market_json("new", "New catalog")]));

        let report = f.service.warm_start();
        assert_eq!(report.catalog_markets, 0);
        assert!(f.service.persistent().load::<Value>(&Dataset::AllMarkets).is_none());

        assert_eq!(f.service.refresh_catalog().await.unwrap(), 1);
        assert_eq!(f.fetcher.calls(Namespace::Catalog, "/markets"), 1);
        assert!(f.service.index().get("new").is_some());
        assert!(f.service.index().get("old").is_none());

        // the live fetch wrote a fresh snapshot
        let snapshot = f.service.persistent().load::<Value>(&Dataset::AllMarkets).unwrap();
        assert_eq!(snapshot.timestamp, f.clock.now_ms());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_catalog_refresh_reaches_search() {
        let f = fixture();
        f.fetcher.respond(Namespace::Catalog, "/markets", json!([market_json("old", "Will BTC reach 100k")]));
        assert_eq!(f.service.refresh_catalog().await.unwrap(), 1);
        assert_eq!(f.service.search("btc", 10).len(), 1);

        f.clock.advance(Duration::from_secs(31 * 60));
        f.fetcher.respond_after(
            Namespace::Catalog,
            "/markets",
            Duration::from_millis(20),
            json!([market_json("new", "Will ETH reach 10k")]),
        );

        // the stale catalog is still searchable while the refresh runs
        f.service.refresh_catalog().await.unwrap();
        assert_eq!(f.service.search("btc", 10)[0].market.id, "old");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.fetcher.calls(Namespace::Catalog, "/markets"), 2);
        let hits = f.service.search("eth", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].market.id, "new");
        assert!(f.service.search("btc", 10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_list_is_served_then_revalidated() {
        let f = fixture();
        f.fetcher.respond(Namespace::Catalog, "/markets", json!([market_json("m1", "First")]));
        let first = f.service.market_list(Timeframe::Day).await.unwrap();
        assert_eq!(first.data[0].title, "First");

        f.clock.advance(Duration::from_secs(16));
        f.fetcher
            .respond_after(Namespace::Catalog, "/markets", Duration::from_millis(20), json!([market_json("m1", "Second")]));

        let stale = f.service.market_list(Timeframe::Day).await.unwrap();
        assert!(stale.is_stale);
        assert_eq!(stale.data[0].title, "First");

        tokio::time::sleep(Duration::from_millis(50)).await;
        let fresh = f.service.market_list(Timeframe::Day).await.unwrap();
        assert!(!fresh.is_stale);
        assert_eq!(fresh.data[0].title, "Second");
        assert_eq!(f.fetcher.calls(Namespace::Catalog, "/markets"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_surfaced_with_retry_hint() {
        let f = fixture();
        f.fetcher.fail(
            Namespace::Catalog,
            "/markets",
            SyncError::RateLimited { retry_after: Duration::from_secs(7) },
        );

        let err = f.service.market_list(Timeframe::Week).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert!(f.service.persistent().load::<Value>(&Dataset::MarketList(Timeframe::Week)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_falls_back_to_upstream_only_without_local_hits() {
        let f = fixture();
        f.service.index().replace_catalog(vec![MarketSummary::new("m1", "Will BTC reach 100k")]);
        f.fetcher.respond(
            Namespace::Catalog,
            "/public-search",
            json!({ "events": [{ "id": "e9", "title": "Rain", "markets": [
                { "id": "r1", "question": "Rain in London tomorrow" },
                { "id": "r2", "question": "London rain totals", "closed": true }
            ] }] }),
        );

        let local = f.service.search_with_fallback("btc", 10).await.unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(f.fetcher.total_calls(), 0);

        assert!(f.service.search_with_fallback("   ", 10).await.unwrap().is_empty());
        assert_eq!(f.fetcher.total_calls(), 0);

        let remote = f.service.search_with_fallback("london rain", 10).await.unwrap();
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].market.id, "r1");
        assert_eq!(f.fetcher.calls(Namespace::Catalog, "/public-search"), 1);
    }

    #[tokio::test]
    async fn test_search_history_survives_restart() {
        let f = fixture();
        f.service.record_search(&MarketSummary::new("m1", "BTC"));
        f.service.record_search(&MarketSummary::new("m2", "ETH"));
        f.service.record_search(&MarketSummary::new("m1", "BTC"));

        let restarted = service_with(f.clock.clone(), f.fetcher.clone(), f.storage.clone());
        let ids: Vec<_> = restarted.search_history().into_iter().map(|item| item.id).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detail_snapshot_paints_shell_after_restart() {
        let f = fixture();
        f.fetcher.respond(Namespace::Catalog, "/markets/m1", market_json("m1", "Snapshotted"));
        script_subresources(&f.fetcher);
        f.service.market_detail("m1").await.unwrap();

        let restarted = service_with(f.clock.clone(), f.fetcher.clone(), f.storage.clone());
        let calls = f.fetcher.total_calls();
        assert!(restarted.open_market("m1").await);
        assert_eq!(restarted.loader().view().shell.unwrap().title, "Snapshotted");
        // detail came from the snapshot; only sub-resources went out
        assert_eq!(f.fetcher.calls(Namespace::Catalog, "/markets/m1"), 1);
        assert!(f.fetcher.total_calls() > calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_market_and_clear_reset_prefetch() {
        let f = fixture();
        f.fetcher.respond(Namespace::Catalog, "/markets/m1", market_json("m1", "Q"));
        script_subresources(&f.fetcher);

        f.service.prefetcher().prefetch("m1").unwrap().await.unwrap();
        f.service.refresh_market("m1");
        assert!(!f.service.prefetcher().is_requested("m1"));
        f.service.prefetcher().prefetch("m1").unwrap().await.unwrap();
        assert_eq!(f.fetcher.calls(Namespace::Catalog, "/markets/m1"), 2);

        f.service.clear_cache();
        assert!(f.service.prefetcher().is_empty());
        assert!(f.service.api().cached_shell("m1").is_none());
    }

    #[test]
    fn test_builder_with_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = DataSyncConfig { storage_dir: dir.path().join("snapshots").display().to_string(), ..DataSyncConfig::default() };
        let service = DataSyncService::builder(config)
            .fetcher(Arc::new(MockFetcher::new()))
            .clock(Arc::new(ManualClock::new(0)))
            .build()
            .unwrap();

        service.record_search(&MarketSummary::new("m1", "BTC"));
        assert!(dir.path().join("snapshots").join("search%3Ahistory.json").exists());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = DataSyncConfig { cache_capacity: 0, ..DataSyncConfig::default() };
        let result = DataSyncService::builder(config)
            .fetcher(Arc::new(MockFetcher::new()))
            .storage(Arc::new(MemoryStorage::new()))
            .build();
        assert!(result.is_err());
    }
}
