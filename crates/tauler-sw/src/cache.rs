//! Cache generations.
//!
//! ```text
//! CacheStorage
//!     └── Generation ("eltauler-2.0.1736268000")
//!             └── CacheKey (GET + URL) → CacheEntry
//! ```
//!
//! The storage primitive lives behind the [`CacheStorage`] trait. Each single
//! `put`/`delete` is atomic; nothing spans operations.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::join_all;
use hashbrown::HashMap;
use http::Method;
use tauler_net::{Fetcher, Request, Response};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

/// Errors from the cache store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to cache {} of the requested URLs", failed.len())]
    AddAll { failed: Vec<String> },

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Request identity used as a cache key.
///
/// Fragments never reach the network, so they are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: String,
}

impl CacheKey {
    pub fn for_request(request: &Request) -> Self {
        Self::new(request.method.clone(), &request.url)
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(Method::GET, url)
    }

    fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.into(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A cached response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: Response,
    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

/// The persistent cache store.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> CacheResult<()>;

    /// Check if a generation exists.
    async fn has(&self, name: &str) -> CacheResult<bool>;

    /// Store a response. Creates the generation if needed. Only GET keys are accepted.
    async fn put(&self, name: &str, key: CacheKey, response: Response) -> CacheResult<()>;

    /// Overwrite an entry in a generation that still exists.
    ///
    /// Returns `false` and stores nothing if the generation has been deleted.
    async fn update(&self, name: &str, key: CacheKey, response: Response) -> CacheResult<bool>;

    /// Look a key up in one generation.
    async fn match_in(&self, name: &str, key: &CacheKey) -> CacheResult<Option<Response>>;

    /// Keys stored in a generation.
    async fn entries(&self, name: &str) -> CacheResult<Vec<CacheKey>>;

    /// All generation names.
    async fn keys(&self) -> CacheResult<Vec<String>>;

    /// Delete a generation. Returns whether it existed.
    async fn delete(&self, name: &str) -> CacheResult<bool>;
}

/// Fetch every URL and store the results in `name`.
///
/// All or nothing: if any fetch fails or comes back non-2xx, nothing is stored
/// and the failed URLs are reported.
pub async fn add_all(
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
    name: &str,
    urls: &[Url],
) -> CacheResult<usize> {
    let fetches = urls.iter().map(|url| async move {
        let request = Request::get(url.clone());
        let result = fetcher.fetch(&request).await;
        (request, result)
    });
    let results = join_all(fetches).await;

    let mut fetched = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (request, result) in results {
        match result {
            Ok(response) if response.ok() => fetched.push((request, response)),
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Pre-cache got bad status");
                failed.push(request.url.to_string());
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Pre-cache fetch failed");
                failed.push(request.url.to_string());
            }
        }
    }

    if !failed.is_empty() {
        return Err(CacheError::AddAll { failed });
    }

    storage.open(name).await?;
    let count = fetched.len();
    for (request, response) in fetched {
        storage
            .put(name, CacheKey::for_request(&request), response)
            .await?;
    }
    Ok(count)
}

/// A single generation.
#[derive(Debug, Default)]
struct Generation {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl Generation {
    fn match_request(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    fn put(&mut self, key: CacheKey, response: Response) {
        let entry = CacheEntry {
            response,
            cached_at: now_ms(),
        };
        self.entries.insert(key, entry);
    }

    fn keys(&self) -> Vec<CacheKey> {
        self.entries.keys().cloned().collect()
    }
}

/// In-memory [`CacheStorage`].
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStorage {
    generations: Arc<RwLock<HashMap<String, Generation>>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the full entry, including when it was stored.
    pub async fn entry(&self, name: &str, key: &CacheKey) -> Option<CacheEntry> {
        let generations = self.generations.read().await;
        generations.get(name)?.match_request(key).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> CacheResult<()> {
        let mut generations = self.generations.write().await;
        if !generations.contains_key(name) {
            debug!(cache = name, "Creating cache generation");
            generations.insert(name.to_string(), Generation::default());
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        Ok(self.generations.read().await.contains_key(name))
    }

    async fn put(&self, name: &str, key: CacheKey, response: Response) -> CacheResult<()> {
        check_method(&key)?;
        trace!(cache = name, key = %key, status = %response.status, "Cache put");
        let mut generations = self.generations.write().await;
        generations
            .entry(name.to_string())
            .or_default()
            .put(key, response);
        Ok(())
    }

    async fn update(&self, name: &str, key: CacheKey, response: Response) -> CacheResult<bool> {
        check_method(&key)?;
        let mut generations = self.generations.write().await;
        match generations.get_mut(name) {
            Some(generation) => {
                trace!(cache = name, key = %key, status = %response.status, "Cache update");
                generation.put(key, response);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> CacheResult<Option<Response>> {
        let generations = self.generations.read().await;
        Ok(generations
            .get(name)
            .and_then(|generation| generation.match_request(key))
            .map(|entry| entry.response.clone()))
    }

    async fn entries(&self, name: &str) -> CacheResult<Vec<CacheKey>> {
        let generations = self.generations.read().await;
        generations
            .get(name)
            .map(Generation::keys)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        Ok(self.generations.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        Ok(self.generations.write().await.remove(name).is_some())
    }
}

fn check_method(key: &CacheKey) -> CacheResult<()> {
    if key.method != Method::GET {
        return Err(CacheError::Storage(format!(
            "only GET requests can be cached, got {}",
            key.method
        )));
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
