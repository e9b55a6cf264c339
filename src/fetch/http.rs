use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::proxy::{EgressRotator, ProxyRoute};
use super::{Fetcher, Namespace, Request};
use crate::data_sync::config::DataSyncConfig;
use crate::error::{SyncError, SyncResult};

/// Network [`Fetcher`] with a fixed timeout, default headers and optional
/// round-robin egress rotation.
#[derive(Debug)]
pub struct HttpFetcher {
    catalog_base: Url,
    clob_base: Url,
    data_base: Url,
    direct: Client,
    /// One client per configured egress proxy, same order as the rotator.
    egress_clients: Vec<Client>,
    rotator: EgressRotator,
    timeout: Duration,
    default_retry_after: Duration,
}

fn default_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    h.insert(USER_AGENT, HeaderValue::from_static("market-sync/0.1"));
    h
}

fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .default_headers(default_headers())
        .connect_timeout(timeout)
        .timeout(timeout);
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy).with_context(|| format!("parse egress proxy {proxy}"))?);
    }
    builder.build().context("build reqwest client")
}

impl HttpFetcher {
    pub fn new(config: &DataSyncConfig) -> Result<Self> {
        let timeout = config.request_timeout();
        let egress_clients = config
            .egress_proxies
            .iter()
            .map(|p| build_client(timeout, Some(p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            catalog_base: Url::parse(&config.catalog_base_url).context("parse catalog base url")?,
            clob_base: Url::parse(&config.clob_base_url).context("parse clob base url")?,
            data_base: Url::parse(&config.data_base_url).context("parse data base url")?,
            direct: build_client(timeout, None)?,
            egress_clients,
            rotator: EgressRotator::new(config.egress_proxies.clone()),
            timeout,
            default_retry_after: config.rate_limit_retry(),
        })
    }

    fn base(&self, namespace: Namespace) -> &Url {
        match namespace {
            Namespace::Catalog => &self.catalog_base,
            Namespace::Clob => &self.clob_base,
            Namespace::Data => &self.data_base,
        }
    }

    fn build_url(&self, request: &Request) -> SyncResult<Url> {
        let base = self.base(request.namespace);
        let mut url = base
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| SyncError::network(format!("join url {}: {e}", request.path)))?;
        if !request.params.is_empty() {
            url.query_pairs_mut().extend_pairs(request.params.iter());
        }
        Ok(url)
    }

    fn next_client(&self) -> &Client {
        match self.rotator.next_index() {
            Some(i) => &self.egress_clients[i],
            None => &self.direct,
        }
    }

    fn retry_after(&self, headers: &HeaderMap) -> Duration {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
    }

    /// Dispatches a `/proxy/{namespace}/{rest}` path.
    pub async fn fetch_proxied(&self, path_and_query: &str) -> SyncResult<Value> {
        let route = ProxyRoute::parse(path_and_query)?;
        self.fetch(&route.request).await
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> SyncResult<Value> {
        let url = self.build_url(request)?;
        debug!(target: "http", url = %url, "upstream GET");

        let resp = self.next_client().get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout { millis: self.timeout.as_millis() as u64 }
            } else {
                SyncError::from(e)
            }
        })?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = self.retry_after(resp.headers());
            warn!(target: "http", url = %url, ?retry_after, "upstream rate limited");
            return Err(SyncError::RateLimited { retry_after });
        }

        let body = resp.bytes().await.map_err(SyncError::from)?;
        if !status.is_success() {
            return Err(SyncError::Upstream {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }
}
