/// Upstream access.
///
/// The data layer only ever talks to a [`Fetcher`]: one bounded GET against one
/// of three logical namespaces, returning parsed JSON. [`HttpFetcher`] is the
/// network implementation; tests substitute scripted fetchers.
pub mod http;
#[cfg(test)]
pub mod mock;
pub mod proxy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::SyncResult;

pub use http::HttpFetcher;
pub use proxy::{EgressRotator, ProxyRoute};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Market metadata, prices, volumes.
    Catalog,
    /// Order books and price history.
    Clob,
    /// Trades, holders, traders.
    Data,
}

/// A parameterized GET against one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    pub namespace: Namespace,
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl Request {
    pub fn new(namespace: Namespace, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') { path } else { format!("/{path}") };
        Self { namespace, path, params: Vec::new() }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// Stable cache key; parameter order does not matter.
    pub fn cache_key(&self) -> String {
        let mut params = self.params.clone();
        params.sort();
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if query.is_empty() {
            format!("{}:{}", self.namespace, self.path)
        } else {
            format!("{}:{}?{}", self.namespace, self.path, query)
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> SyncResult<Value>;
}
