// Layers
pub mod data_sync;  // Cache, request coordination, snapshots, search, prefetch, phased loading
pub mod fetch;      // Upstream access: Fetcher contract, HTTP fetcher, proxy routing
pub mod model;      // Typed market records decoded from upstream JSON

// Common utilities and types
pub mod error;
pub mod utils;

// Re-export key components from each layer
pub use data_sync::{
    CacheRead, CacheStore, DataSyncConfig, DataSyncService, DataSyncServiceBuilder, Dataset, LoadPhase,
    LoaderView, MarketApi, PersistentCache, PhasedLoader, PrefetchScheduler, RequestCoordinator, SearchHit,
    SearchIndex, Tracked,
};
pub use error::{SyncError, SyncResult};
pub use fetch::{Fetcher, HttpFetcher, Namespace, Request};
pub use model::{MarketDetail, MarketSummary, Timeframe};
pub use utils::{Clock, ManualClock, SystemClock};
