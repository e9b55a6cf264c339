use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::model::MarketSummary;

const FULL_QUERY_SCORE: u32 = 100;
const TOKEN_SCORE: u32 = 10;
const TOKEN_PREFIX_SCORE: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub market: MarketSummary,
    pub score: u32,
}

/// Lower-cased query plus its scoring tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedQuery {
    pub text: String,
    pub tokens: Vec<String>,
}

impl PreparedQuery {
    /// `None` for queries that are blank after trimming.
    pub fn new(query: &str) -> Option<Self> {
        let text = query.trim().to_lowercase();
        if text.is_empty() {
            return None;
        }
        let tokens = text
            .split_whitespace()
            .filter(|t| t.chars().count() > 1)
            .map(str::to_string)
            .collect();
        Some(Self { text, tokens })
    }

    pub fn score(&self, title: &str) -> u32 {
        let title = title.to_lowercase();
        let mut score = 0;
        if title.contains(&self.text) {
            score += FULL_QUERY_SCORE;
        }
        for token in &self.tokens {
            if title.contains(token.as_str()) {
                score += TOKEN_SCORE;
                if title.starts_with(token.as_str()) {
                    score += TOKEN_PREFIX_SCORE;
                }
            }
        }
        score
    }
}

/// Process-wide catalog of market summaries with synchronous token-scored search.
///
/// The catalog is replaced wholesale on every fresh catalog fetch; search
/// never touches the network.
#[derive(Debug, Default)]
pub struct SearchIndex {
    catalog: RwLock<Arc<Vec<MarketSummary>>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_catalog(&self, markets: Vec<MarketSummary>) {
        debug!(markets = markets.len(), "search catalog replaced");
        *self.catalog.write() = Arc::new(markets);
    }

    /// Installs `markets` only if no catalog is indexed yet; a catalog swapped
    /// in concurrently is never overwritten.
    pub fn install_if_empty(&self, markets: Vec<MarketSummary>) -> bool {
        let mut catalog = self.catalog.write();
        if !catalog.is_empty() {
            return false;
        }
        debug!(markets = markets.len(), "search catalog installed");
        *catalog = Arc::new(markets);
        true
    }

    pub fn catalog(&self) -> Arc<Vec<MarketSummary>> {
        Arc::clone(&self.catalog.read())
    }

    pub fn len(&self) -> usize {
        self.catalog.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<MarketSummary> {
        self.catalog.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let Some(prepared) = PreparedQuery::new(query) else {
            return Vec::new();
        };
        // Score against a snapshot so a concurrent replace cannot tear the result.
        let catalog = self.catalog();
        let mut hits: Vec<SearchHit> = catalog
            .iter()
            .filter_map(|market| {
                let score = prepared.score(&market.title);
                (score > 0).then(|| SearchHit { market: market.clone(), score })
            })
            .collect();
        // `sort_by` is stable: ties keep catalog order.
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        hits.truncate(limit);
        hits
    }

    /// Merges `remote` into `local` hits, de-duplicated by id (the local
    /// record wins). Every hit, local or remote, is re-scored against `query`
    /// so both sides rank on the same scale; ties keep local hits first.
    pub fn merge_ranked(query: &str, local: Vec<SearchHit>, remote: Vec<MarketSummary>, limit: usize) -> Vec<SearchHit> {
        let Some(prepared) = PreparedQuery::new(query) else {
            return Vec::new();
        };
        let mut seen: HashSet<String> = local.iter().map(|h| h.market.id.clone()).collect();
        let mut merged: Vec<SearchHit> = local
            .into_iter()
            .map(|hit| {
                let score = prepared.score(&hit.market.title);
                SearchHit { market: hit.market, score }
            })
            .collect();
        for market in remote {
            if seen.insert(market.id.clone()) {
                let score = prepared.score(&market.title);
                merged.push(SearchHit { market, score });
            }
        }
        merged.sort_by(|a, b| b.score.cmp(&a.score));
        merged.truncate(limit);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(titles: &[(&str, &str)]) -> SearchIndex {
        let index = SearchIndex::new();
        index.replace_catalog(titles.iter().map(|(id, title)| MarketSummary::new(*id, *title)).collect());
        index
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.market.id.as_str()).collect()
    }

    #[test]
    fn test_btc_scenario() {
        let index = index(&[("m1", "Will BTC reach 100k")]);

        let hits = index.search("btc", 10);
        assert_eq!(ids(&hits), vec!["m1"]);
        assert!(hits[0].score >= 10);

        let hits = index.search("100k", 10);
        assert_eq!(ids(&hits), vec!["m1"]);
        assert!(hits[0].score >= 10);

        assert!(index.search("xyz", 10).is_empty());
    }

    #[test]
    fn test_blank_query_returns_nothing() {
        let index = index(&[("m1", "Will BTC reach 100k")]);
        assert!(index.search("", 10).is_empty());
        assert!(index.search("   \t", 10).is_empty());
    }

    #[test]
    fn test_scoring_rules() {
        let q = PreparedQuery::new("  BTC Price ").unwrap();
        assert_eq!(q.text, "btc price");
        assert_eq!(q.tokens, vec!["btc", "price"]);
        // full query + two tokens + prefix bonus for "btc"
        assert_eq!(q.score("BTC price above 100k?"), 100 + 10 + 5 + 10);
        // tokens only, no prefix
        assert_eq!(q.score("Will the price of BTC rise"), 20);
        assert_eq!(q.score("Ethereum merge"), 0);
    }

    #[test]
    fn test_single_char_tokens_are_dropped() {
        let q = PreparedQuery::new("a b trump").unwrap();
        assert_eq!(q.tokens, vec!["trump"]);
        // the full query can still match as a substring
        assert_eq!(q.score("Will a b trump"), 100 + 10);
    }

    #[test]
    fn test_ranking_is_stable_and_limited() {
        let index = index(&[
            ("a", "Will Trump win Iowa"),
            ("b", "Trump approval rating"),
            ("c", "Will Trump win Ohio"),
            ("d", "Senate control"),
        ]);
        let hits = index.search("trump", 10);
        // "b" starts with the token; "a" and "c" tie and keep catalog order
        assert_eq!(ids(&hits), vec!["b", "a", "c"]);

        let limited = index.search("trump", 2);
        assert_eq!(ids(&limited), vec!["b", "a"]);
        assert!(index.search("trump", 0).is_empty());
    }

    #[test]
    fn test_search_is_deterministic() {
        let index = index(&[("a", "BTC up"), ("b", "BTC down"), ("c", "ETH and BTC")]);
        let first = index.search("btc", 10);
        for _ in 0..5 {
            assert_eq!(index.search("btc", 10), first);
        }
    }

    #[test]
    fn test_replace_is_wholesale() {
        let index = index(&[("a", "BTC up")]);
        index.replace_catalog(vec![MarketSummary::new("z", "Rain in London")]);
        assert_eq!(index.len(), 1);
        assert!(index.get("a").is_none());
        assert!(index.search("btc", 5).is_empty());
    }

    #[test]
    fn test_install_if_empty_keeps_a_newer_catalog() {
        let index = SearchIndex::new();
        assert!(index.install_if_empty(vec![MarketSummary::new("a", "BTC up")]));
        assert!(!index.install_if_empty(vec![MarketSummary::new("z", "Rain in London")]));
        assert!(index.get("a").is_some());
        assert!(index.get("z").is_none());
    }

    #[test]
    fn test_merge_dedupes_and_rescores() {
        // a carried score from elsewhere is not trusted
        let local = vec![
            SearchHit { market: MarketSummary::new("a", "BTC up"), score: 15 },
            SearchHit { market: MarketSummary::new("b", "Will BTC dip"), score: 999 },
        ];
        let remote = vec![
            MarketSummary::new("a", "BTC up (remote copy)"),
            MarketSummary::new("r", "BTC to 200k"),
            MarketSummary::new("s", "Unrelated upstream hit"),
        ];
        let merged = SearchIndex::merge_ranked("btc", local, remote, 10);
        // "a" and "r" tie at 115; the local hit stays ahead
        assert_eq!(ids(&merged), vec!["a", "r", "b", "s"]);
        assert_eq!(merged[0].market.title, "BTC up");
        assert_eq!(merged[0].score, 115);
        assert_eq!(merged[1].score, 115);
        assert_eq!(merged[2].score, 110);
        assert_eq!(merged[3].score, 0);

        let limited = SearchIndex::merge_ranked("btc", Vec::new(), vec![MarketSummary::new("r", "BTC to 200k")], 0);
        assert!(limited.is_empty());
    }
}
