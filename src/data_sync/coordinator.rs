use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::cache_store::{CacheRead, CacheStore};
use crate::error::{SyncError, SyncResult};

type SharedFetch<T> = Shared<BoxFuture<'static, SyncResult<T>>>;

struct InFlight<T: Clone> {
    ticket: u64,
    operation: SharedFetch<T>,
}

#[derive(Debug, Default)]
pub struct CoordinatorStats {
    /// Upstream calls actually issued.
    pub started: AtomicU64,
    /// Callers that joined an operation already in flight.
    pub joined: AtomicU64,
    /// Background refreshes scheduled for stale entries.
    pub revalidations: AtomicU64,
}

/// Stale-while-revalidate front of a [`CacheStore`] with per-key request
/// deduplication.
///
/// Every upstream call runs as its own task and is registered under its cache
/// key until it settles, so a key never has two calls outstanding and a call
/// finishes (and deregisters) even if every caller stops waiting for it.
pub struct RequestCoordinator<T: Clone> {
    cache: Arc<CacheStore<T>>,
    in_flight: Arc<DashMap<String, InFlight<T>>>,
    timeout: Duration,
    tickets: AtomicU64,
    pub stats: Arc<CoordinatorStats>,
}

impl<T> RequestCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(cache: Arc<CacheStore<T>>, timeout: Duration) -> Self {
        Self {
            cache,
            in_flight: Arc::new(DashMap::new()),
            timeout,
            tickets: AtomicU64::new(0),
            stats: Arc::new(CoordinatorStats::default()),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore<T>> {
        &self.cache
    }

    /// Resolves `key`, serving cached data whenever any exists.
    ///
    /// - fresh entry: returned, no call.
    /// - stale entry: returned immediately, a background refresh is started
    ///   unless one is already running for the key.
    /// - no entry: joins the in-flight call for the key or starts one, and
    ///   surfaces its outcome.
    pub async fn resolve<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> SyncResult<CacheRead<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        if let Some(read) = self.cache.get(key) {
            if read.is_stale {
                self.revalidate(key, ttl, fetch);
            }
            return Ok(read);
        }

        let operation = self.join_or_start(key, ttl, fetch, false);
        let data = operation.await?;
        Ok(CacheRead { data, is_stale: false, fetched_at: self.cache.now_ms() })
    }

    /// Cache-only read; `CacheMiss` when nothing is stored.
    pub fn peek(&self, key: &str) -> SyncResult<CacheRead<T>> {
        self.cache.get(key).ok_or_else(|| SyncError::CacheMiss { key: key.to_string() })
    }

    /// Starts a background refresh for `key` unless one is in flight.
    /// Failures are logged and leave the cached value untouched.
    pub fn revalidate<F, Fut>(&self, key: &str, ttl: Duration, fetch: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        if self.in_flight.contains_key(key) {
            debug!(key = %key, "revalidation already in flight");
            return;
        }
        self.stats.revalidations.fetch_add(1, Ordering::Relaxed);
        // The spawned task drives the call; nobody needs to await it.
        drop(self.join_or_start(key, ttl, fetch, true));
    }

    fn join_or_start<F, Fut>(&self, key: &str, ttl: Duration, fetch: F, background: bool) -> SharedFetch<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                self.stats.joined.fetch_add(1, Ordering::Relaxed);
                existing.get().operation.clone()
            }
            Entry::Vacant(slot) => {
                let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
                let operation = self.spawn_operation(key.to_string(), ticket, ttl, fetch(), background);
                slot.insert(InFlight { ticket, operation: operation.clone() });
                operation
            }
        }
    }

    fn spawn_operation<Fut>(
        &self,
        key: String,
        ticket: u64,
        ttl: Duration,
        fetch: Fut,
        background: bool,
    ) -> SharedFetch<T>
    where
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
    {
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, fetch).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout { millis: timeout.as_millis() as u64 }),
            };
            match &result {
                Ok(data) => cache.set(&key, data.clone(), ttl),
                Err(e) if background => warn!(key = %key, error = %e, "background revalidation failed, keeping cached value"),
                Err(e) => debug!(key = %key, error = %e, "foreground fetch failed"),
            }
            in_flight.remove_if(&key, |_, entry| entry.ticket == ticket);
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::network(format!("fetch task aborted: {e}"))),
            }
        }
        .boxed()
        .shared()
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.invalidate(key)
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}
