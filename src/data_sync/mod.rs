/// Data Synchronization Layer
/// 
/// Sits between the dashboard and a slow, rate-limited upstream. It provides:
/// 
/// - A TTL cache that keeps serving stale values (stale-while-revalidate)
/// - Per-key request deduplication for every upstream call
/// - Durable per-dataset snapshots for warm starts
/// - An in-memory search index over the market catalog
/// - Hover/viewport prefetching and phased loading of market detail views

// Core data sync components
pub mod config;
pub mod cache_store;
pub mod coordinator;
pub mod persistent;
pub mod api;
pub mod service;

// Consumers built on the cache
pub mod search_index;
pub mod search_history;
pub mod prefetch;
pub mod phased_loader;

// Tests
#[cfg(test)]
mod tests;

// Re-export main components for easy usage
pub use api::MarketApi;
pub use cache_store::{CacheEntry, CacheRead, CacheStats, CacheStore};
pub use config::{CacheTtls, DataSyncConfig, SnapshotTtls};
pub use coordinator::{CoordinatorStats, RequestCoordinator};
pub use persistent::{Dataset, DurableStorage, Envelope, FileStorage, MemoryStorage, PersistentCache};
pub use phased_loader::{LoadPhase, LoaderView, PhasedLoader, Tracked};
pub use prefetch::{PrefetchScheduler, PrefetchStats};
pub use search_history::SearchHistory;
pub use search_index::{SearchHit, SearchIndex};
pub use service::{DataSyncService, DataSyncServiceBuilder, WarmStartReport};
