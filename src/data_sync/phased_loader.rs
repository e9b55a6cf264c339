//! Staged loading of one market's detail view.
//!
//! `enter` paints a shell synchronously, then `load` resolves detail and the
//! event outcome list in parallel, and finally the sub-resources that need ids
//! only the detail carries. Every switch to another market bumps the view
//! generation; results dispatched under an older generation are dropped when
//! they complete, so a slow response for a previous market can never land on
//! the one being shown.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::api::MarketApi;
use super::cache_store::CacheRead;
use super::search_index::SearchIndex;
use crate::error::{SyncError, SyncResult};
use crate::model::{
    Holder, MarketDetail, MarketShell, OrderBook, OutcomeDetail, OutcomesList, PricePoint, TopTrader, Trade,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Idle,
    ShellOnly,
    DetailPending,
    DetailResolved,
    SubresourcesPending,
    SubresourcesResolved,
}

/// A value as the view sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum Tracked<T> {
    /// Not confirmed yet; may carry an optimistic value to show meanwhile.
    Pending(Option<T>),
    Resolved(T),
    /// Last known value, either served past its TTL or kept after a failed refresh.
    Stale(T),
}

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Tracked::Pending(None)
    }
}

impl<T> Tracked<T> {
    pub fn from_read(read: CacheRead<T>) -> Self {
        if read.is_stale {
            Tracked::Stale(read.data)
        } else {
            Tracked::Resolved(read.data)
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Tracked::Pending(optimistic) => optimistic.as_ref(),
            Tracked::Resolved(value) | Tracked::Stale(value) => Some(value),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Tracked::Pending(_))
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Tracked::Resolved(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Tracked::Stale(_))
    }

    /// Keeps whatever is currently shown, now marked stale.
    pub fn into_stale(self) -> Self {
        match self {
            Tracked::Pending(Some(value)) | Tracked::Resolved(value) | Tracked::Stale(value) => Tracked::Stale(value),
            Tracked::Pending(None) => Tracked::Pending(None),
        }
    }
}

/// Render state of the current market.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderView {
    pub id: Option<String>,
    pub generation: u64,
    pub phase: LoadPhase,
    pub shell: Option<MarketShell>,
    pub detail: Tracked<MarketDetail>,
    pub outcomes: Tracked<OutcomesList>,
    pub trades: Tracked<Vec<Trade>>,
    pub order_book: Tracked<OrderBook>,
    pub price_history: Tracked<Vec<PricePoint>>,
    pub trader_count: Tracked<u64>,
    pub holders: Tracked<Vec<Holder>>,
    pub top_traders: Tracked<Vec<TopTrader>>,
    pub selected_outcome: Option<usize>,
    pub outcome_detail: Tracked<OutcomeDetail>,
    /// Set when the primary detail call fails.
    pub error: Option<SyncError>,
    selection: u64,
}

pub struct PhasedLoader {
    api: Arc<MarketApi>,
    index: Arc<SearchIndex>,
    view: Mutex<LoaderView>,
}

impl PhasedLoader {
    pub fn new(api: Arc<MarketApi>, index: Arc<SearchIndex>) -> Self {
        Self { api, index, view: Mutex::new(LoaderView::default()) }
    }

    pub fn view(&self) -> LoaderView {
        self.view.lock().clone()
    }

    pub fn generation(&self) -> u64 {
        self.view.lock().generation
    }

    pub fn current_id(&self) -> Option<String> {
        self.view.lock().id.clone()
    }

    /// Enters and fully loads `id`. Returns whether this load is still the
    /// current one once it settles.
    pub async fn open(&self, id: &str) -> bool {
        let generation = self.enter(id);
        self.load(id, generation).await;
        self.generation() == generation
    }

    /// Phase 0: switches the view to `id` and paints a cached shell if one
    /// exists. Never touches the network. Returns the new generation.
    pub fn enter(&self, id: &str) -> u64 {
        let shell = self
            .api
            .cached_shell(id)
            .or_else(|| self.index.get(id).map(|summary| MarketShell::from(&summary)));

        let mut view = self.view.lock();
        let generation = view.generation + 1;
        let selection = view.selection;
        let phase = if shell.is_some() { LoadPhase::ShellOnly } else { LoadPhase::DetailPending };
        *view = LoaderView { id: Some(id.to_string()), generation, phase, shell, selection, ..LoaderView::default() };
        debug!(id = %id, generation, ?phase, "entered market");
        generation
    }

    /// Phases 1 and 2 for a generation obtained from [`Self::enter`].
    pub async fn load(&self, id: &str, generation: u64) {
        self.apply(generation, "phase", |view| view.phase = LoadPhase::DetailPending);

        let detail_branch = async {
            let detail = match self.api.market_detail(id).await {
                Ok(read) => read,
                Err(e) => {
                    warn!(id = %id, error = %e, "market detail failed");
                    self.apply(generation, "detail", |view| {
                        view.detail = std::mem::take(&mut view.detail).into_stale();
                        view.error = Some(e);
                    });
                    return;
                }
            };
            let data = detail.data.clone();
            let current = self.apply(generation, "detail", |view| {
                view.shell = Some(data.shell());
                view.detail = Tracked::from_read(detail);
                view.phase = LoadPhase::DetailResolved;
            });
            if !current {
                return;
            }

            let trades = async {
                let result = self.api.trades(&data.condition_id).await;
                self.settle(generation, "trades", result, |view| &mut view.trades);
            };
            tokio::join!(trades, self.load_subresources(generation, &data));
            self.apply(generation, "phase", |view| view.phase = LoadPhase::SubresourcesResolved);
        };

        let outcomes_branch = async {
            let result = self.api.event_outcomes(id).await;
            self.settle(generation, "outcomes", result, |view| &mut view.outcomes);
        };

        tokio::join!(detail_branch, outcomes_branch);
    }

    /// Phase 2: everything keyed by the condition or token id.
    async fn load_subresources(&self, generation: u64, detail: &MarketDetail) {
        self.apply(generation, "phase", |view| view.phase = LoadPhase::SubresourcesPending);
        let condition_id = detail.condition_id.as_str();
        let token_id = detail.primary_token_id();

        let book = async {
            if let Some(token) = token_id {
                let result = self.api.order_book(token).await;
                self.settle(generation, "order_book", result, |view| &mut view.order_book);
            }
        };
        let history = async {
            if let Some(token) = token_id {
                let result = self.api.price_history(token).await;
                self.settle(generation, "price_history", result, |view| &mut view.price_history);
            }
        };
        let count = async {
            let result = self.api.trader_count(condition_id).await;
            self.settle(generation, "trader_count", result, |view| &mut view.trader_count);
        };
        let holders = async {
            let result = self.api.top_holders(condition_id).await;
            self.settle(generation, "holders", result, |view| &mut view.holders);
        };
        let traders = async {
            let result = self.api.top_traders(condition_id).await;
            self.settle(generation, "top_traders", result, |view| &mut view.top_traders);
        };
        tokio::join!(book, history, count, holders, traders);
    }

    /// Selects outcome `index` of the loaded outcome list. The list-level
    /// probability is shown at once; the priced detail replaces it unless the
    /// market or the selection changed meanwhile. Returns whether the priced
    /// detail was applied.
    pub async fn select_outcome(&self, index: usize) -> bool {
        let (generation, selection, item) = {
            let mut view = self.view.lock();
            let Some(item) = view.outcomes.value().and_then(|list| list.items.get(index)).cloned() else {
                debug!(index, "no such outcome");
                return false;
            };
            view.selection += 1;
            view.selected_outcome = Some(index);
            view.outcome_detail = Tracked::Pending(Some(OutcomeDetail::basic(&item)));
            (view.generation, view.selection, item)
        };

        let result = self.api.outcome_detail(&item.market_id, &item.label).await;

        let mut view = self.view.lock();
        if view.generation != generation || view.selection != selection {
            debug!(market = %item.market_id, "discarding outcome detail for superseded selection");
            return false;
        }
        match result {
            Ok(read) => {
                view.outcome_detail = Tracked::from_read(read);
                true
            }
            Err(e) => {
                warn!(market = %item.market_id, error = %e, "outcome detail failed, keeping basic price");
                view.outcome_detail = std::mem::take(&mut view.outcome_detail).into_stale();
                false
            }
        }
    }

    /// Runs `update` only if `generation` is still current.
    fn apply(&self, generation: u64, what: &str, update: impl FnOnce(&mut LoaderView)) -> bool {
        let mut view = self.view.lock();
        if view.generation != generation {
            debug!(what, generation, current = view.generation, "discarding result of superseded load");
            return false;
        }
        update(&mut view);
        true
    }

    fn settle<T>(
        &self,
        generation: u64,
        what: &str,
        result: SyncResult<CacheRead<T>>,
        slot: impl FnOnce(&mut LoaderView) -> &mut Tracked<T>,
    ) {
        self.apply(generation, what, |view| {
            let tracked = slot(view);
            *tracked = match result {
                Ok(read) => Tracked::from_read(read),
                Err(e) => {
                    warn!(what, error = %e, "sub-resource failed");
                    std::mem::take(tracked).into_stale()
                }
            };
        });
    }
}
