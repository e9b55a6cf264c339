use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use url::Url;

use super::{Namespace, Request};
use crate::error::{SyncError, SyncResult};

/// Query parameter carrying the catch-all route; never forwarded upstream.
pub const ROUTING_PARAM: &str = "route";

const PROXY_PREFIX: &str = "/proxy/";

/// A `/proxy/{namespace}/{rest...}` path resolved into an upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRoute {
    pub request: Request,
}

impl ProxyRoute {
    /// Parses a proxied path with optional query string.
    pub fn parse(path_and_query: &str) -> SyncResult<Self> {
        // Base is only needed to let `url` split path and query for us.
        let url = Url::parse("http://proxy.local")
            .and_then(|base| base.join(path_and_query))
            .map_err(|e| SyncError::network(format!("invalid proxy path {path_and_query}: {e}")))?;

        let rest = url
            .path()
            .strip_prefix(PROXY_PREFIX)
            .ok_or_else(|| SyncError::network(format!("not a proxy path: {}", url.path())))?;
        let (namespace, rest) = rest.split_once('/').unwrap_or((rest, ""));
        let namespace = Namespace::from_str(namespace)
            .map_err(|_| SyncError::network(format!("unknown namespace: {namespace}")))?;

        let mut request = Request::new(namespace, rest);
        for (name, value) in url.query_pairs() {
            if name != ROUTING_PARAM {
                request = request.param(name.into_owned(), value);
            }
        }
        Ok(Self { request })
    }
}

/// Round-robin over configured egress proxies.
#[derive(Debug, Default)]
pub struct EgressRotator {
    proxies: Vec<String>,
    next: AtomicUsize,
}

impl EgressRotator {
    pub fn new(proxies: Vec<String>) -> Self {
        Self { proxies, next: AtomicUsize::new(0) }
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Index of the egress to use for the next request, `None` when going direct.
    pub fn next_index(&self) -> Option<usize> {
        if self.proxies.is_empty() {
            return None;
        }
        Some(self.next.fetch_add(1, Ordering::Relaxed) % self.proxies.len())
    }

    pub fn next_proxy(&self) -> Option<&str> {
        self.next_index().map(|i| self.proxies[i].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_routing_param() {
        let route = ProxyRoute::parse("/proxy/clob/book?token_id=tok1&route=clob/book").unwrap();
        assert_eq!(route.request.namespace, Namespace::Clob);
        assert_eq!(route.request.path, "/book");
        assert_eq!(route.request.params, vec![("token_id".to_string(), "tok1".to_string())]);
    }

    #[test]
    fn test_parse_nested_rest() {
        let route = ProxyRoute::parse("/proxy/catalog/events/slug/fed-decision").unwrap();
        assert_eq!(route.request.namespace, Namespace::Catalog);
        assert_eq!(route.request.path, "/events/slug/fed-decision");
        assert!(route.request.params.is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_namespace_and_prefix() {
        assert!(ProxyRoute::parse("/proxy/wallet/x").is_err());
        assert!(ProxyRoute::parse("/api/catalog/markets").is_err());
    }

    #[test]
    fn test_rotator_cycles_in_order() {
        let rotator = EgressRotator::new(vec!["http://a".into(), "http://b".into(), "http://c".into()]);
        let picked: Vec<_> = (0..5).filter_map(|_| rotator.next_proxy()).collect();
        assert_eq!(picked, vec!["http://a", "http://b", "http://c", "http://a", "http://b"]);
        assert_eq!(EgressRotator::default().next_proxy(), None);
    }
}
