/// Typed market records decoded from the upstream JSON namespaces.
pub mod activity;
pub mod market;

pub use activity::{BookLevel, Holder, OrderBook, PricePoint, TopTrader, Trade};
pub use market::{
    MarketDetail, MarketShell, MarketStatus, MarketSummary, OutcomeDetail, OutcomeListItem, OutcomesList,
    SearchHistoryItem, Timeframe,
};
