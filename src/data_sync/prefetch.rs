use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::api::MarketApi;
use crate::error::SyncResult;

#[derive(Debug, Default)]
pub struct PrefetchStats {
    pub batches: AtomicU64,
    pub failures: AtomicU64,
    pub skipped: AtomicU64,
}

/// Hover/viewport-driven warm-up of everything a detail view will ask for.
///
/// An id is marked when its first batch is dispatched. The mark survives a
/// successful batch, so the same id is never warmed twice, and is dropped on
/// failure so the next trigger retries. Each mark carries a ticket: a batch
/// that fails after its mark was invalidated and re-issued leaves the newer
/// mark alone.
pub struct PrefetchScheduler {
    api: Arc<MarketApi>,
    requested: Arc<DashMap<String, u64>>,
    tickets: AtomicU64,
    pub stats: Arc<PrefetchStats>,
}

impl PrefetchScheduler {
    pub fn new(api: Arc<MarketApi>) -> Self {
        Self {
            api,
            requested: Arc::new(DashMap::new()),
            tickets: AtomicU64::new(0),
            stats: Arc::new(PrefetchStats::default()),
        }
    }

    pub fn on_hover(&self, id: &str) -> Option<JoinHandle<()>> {
        self.prefetch(id)
    }

    pub fn on_viewport_enter(&self, id: &str) -> Option<JoinHandle<()>> {
        self.prefetch(id)
    }

    /// Dispatches the warm-up batch for `id` unless it was already requested.
    /// Never reports errors; the handle only tells when the batch settled.
    pub fn prefetch(&self, id: &str) -> Option<JoinHandle<()>> {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
        match self.requested.entry(id.to_string()) {
            Entry::Occupied(_) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(ticket);
            }
        }
        self.stats.batches.fetch_add(1, Ordering::Relaxed);

        let api = Arc::clone(&self.api);
        let requested = Arc::clone(&self.requested);
        let stats = Arc::clone(&self.stats);
        let id = id.to_string();
        Some(tokio::spawn(async move {
            match warm(&api, &id).await {
                Ok(()) => debug!(id = %id, "prefetch complete"),
                Err(e) => {
                    stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(id = %id, error = %e, "prefetch failed, will retry on next trigger");
                    requested.remove_if(&id, |_, t| *t == ticket);
                }
            }
        }))
    }

    pub fn is_requested(&self, id: &str) -> bool {
        self.requested.contains_key(id)
    }

    /// Forgets `id` so the next trigger warms it again, e.g. after a manual refresh.
    pub fn invalidate(&self, id: &str) -> bool {
        self.requested.remove(id).is_some()
    }

    pub fn clear(&self) {
        self.requested.clear();
    }

    pub fn len(&self) -> usize {
        self.requested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }
}

/// Detail first (it names the condition and token ids), then every
/// sub-resource concurrently.
async fn warm(api: &MarketApi, id: &str) -> SyncResult<()> {
    let detail = api.market_detail(id).await?.into_data();
    let condition_id = detail.condition_id.clone();
    let token_id = detail.primary_token_id().map(str::to_string);

    let by_condition = async {
        if condition_id.is_empty() {
            api.event_outcomes(id).await?;
            return Ok(());
        }
        futures::try_join!(
            api.event_outcomes(id),
            api.trades(&condition_id),
            api.trader_count(&condition_id),
            api.top_holders(&condition_id),
            api.top_traders(&condition_id),
        )
        .map(|_| ())
    };
    let by_token = async {
        match &token_id {
            Some(token) => futures::try_join!(api.price_history(token), api.order_book(token)).map(|_| ()),
            None => Ok(()),
        }
    };
    futures::try_join!(by_condition, by_token)?;
    Ok(())
}
