use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use super::persistent::{Dataset, PersistentCache};
use crate::model::{MarketSummary, SearchHistoryItem};
use crate::utils::clock::Clock;

/// Most-recent-first list of opened search results, unique by id.
///
/// Every mutation is written through to the durable snapshot.
#[derive(Debug)]
pub struct SearchHistory {
    items: Mutex<Vec<SearchHistoryItem>>,
    limit: usize,
    persistent: Arc<PersistentCache>,
    clock: Arc<dyn Clock>,
}

impl SearchHistory {
    /// Restores any valid snapshot.
    pub fn load(persistent: Arc<PersistentCache>, clock: Arc<dyn Clock>, limit: usize) -> Self {
        let limit = limit.max(1);
        let mut items = persistent
            .load::<Vec<SearchHistoryItem>>(&Dataset::SearchHistory)
            .map(|envelope| envelope.items)
            .unwrap_or_default();
        items.truncate(limit);
        Self { items: Mutex::new(items), limit, persistent, clock }
    }

    pub fn items(&self) -> Vec<SearchHistoryItem> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Adds `market` at the front; an existing entry with the same id moves
    /// to the front instead of being duplicated.
    pub fn add(&self, market: &MarketSummary) {
        let item = SearchHistoryItem {
            id: market.id.clone(),
            name: market.title.clone(),
            probability: market.probability,
            volume: market.volume_usd,
            timestamp: self.clock.now_ms(),
        };
        let mut items = self.items.lock();
        items.retain(|existing| existing.id != item.id);
        items.insert(0, item);
        items.truncate(self.limit);
        // written under the lock so snapshots land in mutation order
        self.persist(&items);
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|existing| existing.id != id);
        let removed = items.len() != before;
        if removed {
            self.persist(&items);
        }
        removed
    }

    pub fn clear(&self) {
        let mut items = self.items.lock();
        items.clear();
        self.persist(&items);
    }

    fn persist(&self, items: &[SearchHistoryItem]) {
        if let Err(e) = self.persistent.store(&Dataset::SearchHistory, &items) {
            warn!(error = %e, "failed to persist search history");
        }
    }
}
