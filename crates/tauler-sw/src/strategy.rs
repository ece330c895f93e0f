//! Network-first and cache-first executors.
//!
//! Both read and write only the current generation. Cache writes are
//! best-effort: a failed write is logged and the response is still delivered.
//! Background refreshes only overwrite a generation that still exists, and a
//! retired executor writes nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::StatusCode;
use tauler_common::{truncate_for_log, with_timeout};
use tauler_net::{Fetcher, NetError, Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::{CacheKey, CacheStorage};
use crate::classifier::Strategy;
use crate::config::WorkerConfig;

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Live network response.
    Network,
    /// Entry for this request in the current generation.
    Cache,
    /// Cached root document served to an offline navigation.
    RootDocument,
    /// Synthesized 503.
    Offline,
    /// Synthesized 404.
    NotFound,
}

/// Result of handling one intercepted request.
#[derive(Debug)]
pub struct FetchOutcome {
    pub response: Response,
    pub strategy: Strategy,
    pub source: ResponseSource,
    /// Background refresh started by a cache-first hit.
    ///
    /// Detached: dropping the handle does not stop it, and the response above
    /// never waits for it.
    pub revalidation: Option<JoinHandle<()>>,
}

impl FetchOutcome {
    fn new(response: Response, strategy: Strategy, source: ResponseSource) -> Self {
        Self {
            response,
            strategy,
            source,
            revalidation: None,
        }
    }
}

/// Runs the caching strategies against the current generation.
#[derive(Clone)]
pub struct Executor {
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    cache_name: Arc<str>,
    retired: Arc<AtomicBool>,
}

impl Executor {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let cache_name = config.cache_name().into();
        Self {
            config,
            storage,
            fetcher,
            cache_name,
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop writing to the cache. Shared with in-flight refreshes.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Dispatch to the executor for `strategy`.
    pub async fn execute(&self, strategy: Strategy, request: &Request) -> FetchOutcome {
        match strategy {
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
        }
    }

    /// Network first, bounded by the configured timeout.
    ///
    /// Fallback chain on transport failure: cached entry, then the root
    /// document for navigations, then a 503.
    pub async fn network_first(&self, request: &Request) -> FetchOutcome {
        let url = truncate_for_log(request.url.as_str(), 50);
        let timeout = self.config.network_timeout();

        let result = with_timeout(timeout, || self.fetcher.fetch(request))
            .await
            .unwrap_or(Err(NetError::Timeout(timeout)));

        let error = match result {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    self.store(CacheKey::for_request(request), response.clone())
                        .await;
                    debug!(url = %url, "Network-first OK");
                }
                return FetchOutcome::new(response, Strategy::NetworkFirst, ResponseSource::Network);
            }
            Err(e) => e,
        };

        debug!(url = %url, error = %error, "Network failed, trying cache");

        if let Some(cached) = self.lookup(&CacheKey::for_request(request)).await {
            debug!(url = %url, "Cache hit");
            return FetchOutcome::new(cached, Strategy::NetworkFirst, ResponseSource::Cache);
        }

        if request.is_navigation() {
            if let Some(root) = self.root_document().await {
                debug!(url = %url, "Serving root document to offline navigation");
                return FetchOutcome::new(root, Strategy::NetworkFirst, ResponseSource::RootDocument);
            }
        }

        warn!(url = %request.url, "No cache available");
        FetchOutcome::new(
            Response::text_plain(
                StatusCode::SERVICE_UNAVAILABLE,
                self.config.offline_message.clone(),
            ),
            Strategy::NetworkFirst,
            ResponseSource::Offline,
        )
    }

    /// Cache first with stale-while-revalidate.
    pub async fn cache_first(&self, request: &Request) -> FetchOutcome {
        let key = CacheKey::for_request(request);

        if let Some(cached) = self.lookup(&key).await {
            trace!(url = %request.url, "Cache-first hit, revalidating in background");
            let mut outcome = FetchOutcome::new(cached, Strategy::CacheFirst, ResponseSource::Cache);
            outcome.revalidation = Some(self.spawn_revalidation(request.clone(), key));
            return outcome;
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    self.store(key, response.clone()).await;
                }
                FetchOutcome::new(response, Strategy::CacheFirst, ResponseSource::Network)
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache-first failed");
                FetchOutcome::new(
                    Response::new(StatusCode::NOT_FOUND, ""),
                    Strategy::CacheFirst,
                    ResponseSource::NotFound,
                )
            }
        }
    }

    /// Refresh an entry without a timeout. Errors are discarded.
    fn spawn_revalidation(&self, request: Request, key: CacheKey) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            match this.fetcher.fetch(&request).await {
                Ok(response) if response.status == StatusCode::OK => {
                    this.refresh(key, response).await;
                }
                Ok(_) | Err(_) => {}
            }
        })
    }

    async fn root_document(&self) -> Option<Response> {
        let url = self.config.root_document_url().ok()?;
        self.lookup(&CacheKey::get(&url)).await
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Response> {
        match self.storage.match_in(&self.cache_name, key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn store(&self, key: CacheKey, response: Response) {
        if self.is_retired() {
            trace!(key = %key, "Retired, not caching");
            return;
        }
        if let Err(e) = self.storage.put(&self.cache_name, key.clone(), response).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    async fn refresh(&self, key: CacheKey, response: Response) {
        if self.is_retired() {
            trace!(key = %key, "Retired, dropping revalidation");
            return;
        }
        match self.storage.update(&self.cache_name, key.clone(), response).await {
            Ok(true) => trace!(key = %key, "Revalidated"),
            Ok(false) => debug!(key = %key, cache = %self.cache_name, "Generation gone, dropping revalidation"),
            Err(e) => warn!(key = %key, error = %e, "Cache write failed"),
        }
    }
}
