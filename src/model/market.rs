use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::{SyncError, SyncResult};

/// Listing windows offered by the dashboard; each is cached and persisted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[strum(serialize = "24h")]
    #[serde(rename = "24h")]
    Day,
    #[strum(serialize = "7d")]
    #[serde(rename = "7d")]
    Week,
    #[strum(serialize = "1mo")]
    #[serde(rename = "1mo")]
    Month,
    All,
}

impl Timeframe {
    /// Upstream field the listing is ordered by.
    pub fn order_field(&self) -> &'static str {
        match self {
            Timeframe::Day => "volume24hr",
            Timeframe::Week => "volume1wk",
            Timeframe::Month => "volume1mo",
            Timeframe::All => "volumeNum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    #[default]
    Active,
    Closed,
    Archived,
}

/// Lightweight catalog record used by listings and the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub id: String,
    pub title: String,
    /// Leading outcome probability, 0..=100.
    pub probability: f64,
    pub volume_usd: f64,
    pub volume_24h: f64,
    pub volume_7d: f64,
    pub volume_1mo: f64,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub status: MarketStatus,
}

impl MarketSummary {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            probability: 0.0,
            volume_usd: 0.0,
            volume_24h: 0.0,
            volume_7d: 0.0,
            volume_1mo: 0.0,
            image: None,
            status: MarketStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDetail {
    #[serde(flatten)]
    pub summary: MarketSummary,
    pub description: String,
    pub outcomes: Vec<String>,
    pub outcome_prices: Vec<f64>,
    pub condition_id: String,
    pub clob_token_ids: Vec<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl MarketDetail {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    /// Token of the first ("Yes") outcome, used for book and price-history lookups.
    pub fn primary_token_id(&self) -> Option<&str> {
        self.clob_token_ids.first().map(String::as_str)
    }

    pub fn shell(&self) -> MarketShell {
        MarketShell {
            id: self.summary.id.clone(),
            title: self.summary.title.clone(),
            image: self.summary.image.clone(),
            outcomes: self.outcomes.clone(),
            outcome_prices: self.outcome_prices.clone(),
        }
    }
}

/// Minimal snapshot sufficient for a first paint before detail resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketShell {
    pub id: String,
    pub title: String,
    pub image: Option<String>,
    pub outcomes: Vec<String>,
    pub outcome_prices: Vec<f64>,
}

impl From<&MarketSummary> for MarketShell {
    fn from(summary: &MarketSummary) -> Self {
        let yes = summary.probability / 100.0;
        Self {
            id: summary.id.clone(),
            title: summary.title.clone(),
            image: summary.image.clone(),
            outcomes: vec!["Yes".to_string(), "No".to_string()],
            outcome_prices: vec![yes, 1.0 - yes],
        }
    }
}

/// Outcome entry of a multi-outcome event, list-level probability only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeListItem {
    pub market_id: String,
    pub label: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomesList {
    pub event_id: String,
    pub title: String,
    pub items: Vec<OutcomeListItem>,
}

impl OutcomesList {
    pub fn is_multi_outcome(&self) -> bool {
        self.items.len() > 1
    }
}

/// Priced detail for one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDetail {
    pub market_id: String,
    pub label: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub yes_cents: f64,
    pub no_cents: f64,
}

impl OutcomeDetail {
    pub fn from_yes_price(market_id: impl Into<String>, label: impl Into<String>, yes_price: f64) -> Self {
        let yes_price = yes_price.clamp(0.0, 1.0);
        let no_price = 1.0 - yes_price;
        Self {
            market_id: market_id.into(),
            label: label.into(),
            yes_price,
            no_price,
            yes_cents: round_cents(yes_price),
            no_cents: round_cents(no_price),
        }
    }

    /// Optimistic value derived from the lightweight outcomes list.
    pub fn basic(item: &OutcomeListItem) -> Self {
        Self::from_yes_price(&item.market_id, &item.label, item.probability / 100.0)
    }
}

fn round_cents(price: f64) -> f64 {
    (price * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHistoryItem {
    pub id: String,
    pub name: String,
    pub probability: f64,
    pub volume: f64,
    pub timestamp: u64,
}

// ============================================================================
// UPSTREAM DECODING
// ============================================================================

/// Accepts either a JSON array or a JSON-encoded string holding one.
fn de_vec_from_str_or_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper<T> {
        Vec(Vec<T>),
        Str(String),
        Null,
    }
    Ok(match Helper::<T>::deserialize(deserializer)? {
        Helper::Vec(v) => v,
        Helper::Str(s) => serde_json::from_str::<Vec<T>>(&s).unwrap_or_default(),
        Helper::Null => Vec::new(),
    })
}

fn de_f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Market record as served by the catalog namespace.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogMarket {
    id: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    description: String,
    #[serde(default, deserialize_with = "de_vec_from_str_or_vec")]
    outcomes: Vec<String>,
    #[serde(default, deserialize_with = "de_vec_from_str_or_vec")]
    outcome_prices: Vec<String>,
    #[serde(default, deserialize_with = "de_vec_from_str_or_vec")]
    clob_token_ids: Vec<String>,
    #[serde(default)]
    condition_id: String,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    volume_num: f64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    volume24hr: f64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    volume1wk: f64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    volume1mo: f64,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    group_item_title: Option<String>,
}

impl CatalogMarket {
    fn prices(&self) -> Vec<f64> {
        self.outcome_prices.iter().map(|p| p.parse().unwrap_or(0.0)).collect()
    }

    fn status(&self) -> MarketStatus {
        if self.archived {
            MarketStatus::Archived
        } else if self.closed {
            MarketStatus::Closed
        } else {
            MarketStatus::Active
        }
    }

    fn summary(&self) -> MarketSummary {
        let probability = self.prices().first().map(|p| (p * 100.0).clamp(0.0, 100.0)).unwrap_or(0.0);
        MarketSummary {
            id: self.id.clone(),
            title: self.question.clone(),
            probability,
            volume_usd: self.volume_num,
            volume_24h: self.volume24hr,
            volume_7d: self.volume1wk,
            volume_1mo: self.volume1mo,
            image: self.image.clone(),
            status: self.status(),
        }
    }

    fn into_detail(self) -> MarketDetail {
        let summary = self.summary();
        let outcome_prices = self.prices();
        MarketDetail {
            summary,
            description: self.description,
            outcomes: self.outcomes,
            outcome_prices,
            condition_id: self.condition_id,
            clob_token_ids: self.clob_token_ids,
            end_date: self.end_date,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEvent {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    markets: Vec<CatalogMarket>,
}

/// Listings may arrive bare or wrapped in `{ "data": [...] }` / `{ "markets": [...] }`.
fn market_array(value: &Value) -> SyncResult<&Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => map
            .get("data")
            .or_else(|| map.get("markets"))
            .and_then(Value::as_array)
            .ok_or_else(|| SyncError::parse("expected an array of markets")),
        _ => Err(SyncError::parse("expected an array of markets")),
    }
}

pub fn parse_summaries(value: &Value) -> SyncResult<Vec<MarketSummary>> {
    market_array(value)?
        .iter()
        .map(|item| {
            CatalogMarket::deserialize(item)
                .map(|m| m.summary())
                .map_err(SyncError::from)
        })
        .collect()
}

pub fn parse_detail(value: &Value) -> SyncResult<MarketDetail> {
    // The by-id endpoint sometimes returns a single-element array.
    let item = match value {
        Value::Array(items) => items.first().ok_or_else(|| SyncError::parse("empty market detail"))?,
        other => other,
    };
    Ok(CatalogMarket::deserialize(item)?.into_detail())
}

/// Builds the lightweight outcome list of the event a market belongs to.
pub fn parse_outcomes_list(value: &Value) -> SyncResult<OutcomesList> {
    let item = match value {
        Value::Array(items) => items.first().ok_or_else(|| SyncError::parse("empty event list"))?,
        other => other,
    };
    let event = CatalogEvent::deserialize(item)?;
    let items = event
        .markets
        .iter()
        .filter(|m| !m.closed)
        .map(|m| OutcomeListItem {
            market_id: m.id.clone(),
            label: m.group_item_title.clone().unwrap_or_else(|| m.question.clone()),
            probability: m.summary().probability,
        })
        .collect();
    Ok(OutcomesList { event_id: event.id, title: event.title, items })
}

pub fn parse_outcome_detail(value: &Value, label: &str) -> SyncResult<OutcomeDetail> {
    let detail = parse_detail(value)?;
    let yes_price = detail.outcome_prices.first().copied().unwrap_or(0.0);
    Ok(OutcomeDetail::from_yes_price(detail.summary.id, label, yes_price))
}

/// Upstream search responses group markets under events.
pub fn parse_search_response(value: &Value) -> SyncResult<Vec<MarketSummary>> {
    let events = value
        .get("events")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::parse("search response without events"))?;
    let mut out = Vec::new();
    for event in events {
        let event = CatalogEvent::deserialize(event)?;
        out.extend(event.markets.iter().filter(|m| !m.closed).map(CatalogMarket::summary));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn sample_market() -> Value {
        json!({
            "id": "m1",
            "question": "Will BTC reach 100k",
            "description": "Resolves yes if...",
            "outcomes": "[\"Yes\", \"No\"]",
            "outcomePrices": "[\"0.62\", \"0.38\"]",
            "clobTokenIds": "[\"tok-yes\", \"tok-no\"]",
            "conditionId": "0xabc",
            "volumeNum": 1500000.5,
            "volume24hr": "1200.0",
            "volume1wk": 9000,
            "image": "https://img/btc.png",
            "endDate": "2026-12-31T00:00:00Z"
        })
    }

    #[test]
    fn test_parse_detail_handles_stringified_arrays() {
        let detail = parse_detail(&sample_market()).unwrap();
        assert_eq!(detail.id(), "m1");
        assert_eq!(detail.outcomes, vec!["Yes", "No"]);
        assert_eq!(detail.outcome_prices, vec![0.62, 0.38]);
        assert_eq!(detail.primary_token_id(), Some("tok-yes"));
        assert!((detail.summary.probability - 62.0).abs() < 1e-9);
        assert_eq!(detail.summary.volume_24h, 1200.0);
        assert_eq!(detail.summary.volume_1mo, 0.0);
    }

    #[test]
    fn test_parse_summaries_accepts_wrapped_lists() {
        let wrapped = json!({ "data": [sample_market()] });
        assert_eq!(parse_summaries(&wrapped).unwrap().len(), 1);
        assert!(parse_summaries(&json!("nope")).is_err());
    }

    #[test]
    fn test_outcomes_list_skips_closed_markets() {
        let event = json!({
            "id": "e1",
            "title": "Fed decision",
            "markets": [
                { "id": "a", "question": "Cut?", "groupItemTitle": "Cut", "outcomePrices": "[\"0.7\",\"0.3\"]" },
                { "id": "b", "question": "Hold?", "groupItemTitle": "Hold", "outcomePrices": "[\"0.2\",\"0.8\"]" },
                { "id": "c", "question": "Hike?", "closed": true }
            ]
        });
        let list = parse_outcomes_list(&event).unwrap();
        assert!(list.is_multi_outcome());
        assert_eq!(list.items.len(), 2);
        assert_eq!(list.items[0].label, "Cut");
        assert!((list.items[0].probability - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_basic_outcome_detail_is_derived_from_probability() {
        let item = OutcomeListItem { market_id: "a".into(), label: "Cut".into(), probability: 70.0 };
        let basic = OutcomeDetail::basic(&item);
        assert!((basic.yes_price - 0.7).abs() < 1e-9);
        assert!((basic.no_cents - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeframe_round_trips_through_strum() {
        assert_eq!(Timeframe::Day.to_string(), "24h");
        assert_eq!(Timeframe::from_str("1mo").unwrap(), Timeframe::Month);
        assert_eq!(Timeframe::All.order_field(), "volumeNum");
    }

    #[test]
    fn test_shell_from_summary() {
        let mut summary = MarketSummary::new("m1", "Will BTC reach 100k");
        summary.probability = 25.0;
        let shell = MarketShell::from(&summary);
        assert_eq!(shell.outcome_prices, vec![0.25, 0.75]);
    }
}
