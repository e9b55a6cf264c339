use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    #[serde(deserialize_with = "de_f64_lenient")]
    pub price: f64,
    #[serde(deserialize_with = "de_f64_lenient")]
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.iter().map(|l| l.price).fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.max(p))))
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.iter().map(|l| l.price).fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.min(p))))
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(default)]
    pub side: String,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub price: f64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub size: f64,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holder {
    #[serde(default, alias = "proxyWallet")]
    pub wallet: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopTrader {
    #[serde(default, alias = "proxyWallet")]
    pub wallet: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "vol", deserialize_with = "de_f64_lenient")]
    pub volume: f64,
    #[serde(default, deserialize_with = "de_f64_lenient")]
    pub pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    #[serde(rename = "t")]
    pub timestamp: u64,
    #[serde(rename = "p", deserialize_with = "de_f64_lenient")]
    pub price: f64,
}

pub fn parse_order_book(value: &Value) -> SyncResult<OrderBook> {
    Ok(OrderBook::deserialize(value)?)
}

pub fn parse_trades(value: &Value) -> SyncResult<Vec<Trade>> {
    Ok(Vec::<Trade>::deserialize(value)?)
}

/// Holder responses are grouped per token; flatten them into one list.
pub fn parse_holders(value: &Value) -> SyncResult<Vec<Holder>> {
    let groups = value.as_array().ok_or_else(|| SyncError::parse("expected holder groups"))?;
    let mut out = Vec::new();
    for group in groups {
        match group.get("holders") {
            Some(holders) => out.extend(Vec::<Holder>::deserialize(holders)?),
            None => out.push(Holder::deserialize(group)?),
        }
    }
    Ok(out)
}

pub fn parse_top_traders(value: &Value) -> SyncResult<Vec<TopTrader>> {
    Ok(Vec::<TopTrader>::deserialize(value)?)
}

pub fn parse_price_history(value: &Value) -> SyncResult<Vec<PricePoint>> {
    let history = value.get("history").unwrap_or(value);
    Ok(Vec::<PricePoint>::deserialize(history)?)
}

/// Trader counts come back either as a bare number or `{ "count": n }`.
pub fn parse_trader_count(value: &Value) -> SyncResult<u64> {
    value
        .as_u64()
        .or_else(|| value.get("count").and_then(Value::as_u64))
        .or_else(|| value.as_array()?.first()?.get("count")?.as_u64())
        .ok_or_else(|| SyncError::parse("missing trader count"))
}
