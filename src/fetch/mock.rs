use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{Fetcher, Namespace, Request};
use crate::error::{SyncError, SyncResult};

#[derive(Clone)]
struct Route {
    response: SyncResult<Value>,
    delay: Duration,
}

/// Scripted [`Fetcher`] for tests.
///
/// Routes match on the full cache key first, then on `namespace:path`
/// ignoring parameters. Unrouted requests fail with a 404.
#[derive(Default)]
pub struct MockFetcher {
    routes: DashMap<String, Route>,
    calls: DashMap<String, usize>,
    total: AtomicUsize,
}

fn route_key(namespace: Namespace, path: &str) -> String {
    Request::new(namespace, path).cache_key()
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, namespace: Namespace, path: &str, value: Value) -> &Self {
        self.respond_after(namespace, path, Duration::ZERO, value)
    }

    pub fn respond_after(&self, namespace: Namespace, path: &str, delay: Duration, value: Value) -> &Self {
        self.routes.insert(route_key(namespace, path), Route { response: Ok(value), delay });
        self
    }

    pub fn fail(&self, namespace: Namespace, path: &str, error: SyncError) -> &Self {
        self.fail_after(namespace, path, Duration::ZERO, error)
    }

    pub fn fail_after(&self, namespace: Namespace, path: &str, delay: Duration, error: SyncError) -> &Self {
        self.routes.insert(route_key(namespace, path), Route { response: Err(error), delay });
        self
    }

    /// Calls recorded for `namespace:path`, any parameters.
    pub fn calls(&self, namespace: Namespace, path: &str) -> usize {
        self.calls.get(&route_key(namespace, path)).map(|c| *c).unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> SyncResult<Value> {
        let path_key = route_key(request.namespace, &request.path);
        *self.calls.entry(path_key.clone()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        let route = self
            .routes
            .get(&request.cache_key())
            .or_else(|| self.routes.get(&path_key))
            .map(|r| r.value().clone());
        let Some(route) = route else {
            return Err(SyncError::Upstream { status: 404, body: format!("no route for {path_key}") });
        };
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }
        route.response
    }
}
