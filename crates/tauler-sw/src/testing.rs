//! Test doubles shared by the unit tests.

use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::StatusCode;
use tauler_net::{Fetcher, NetError, Request, Response};
use tokio::sync::Notify;

use crate::cache::{CacheError, CacheKey, CacheResult, CacheStorage, MemoryCacheStorage};

/// Serves canned responses keyed by URL.
#[derive(Debug)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, (StatusCode, Bytes)>>,
    online: AtomicBool,
    hanging: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            hanging: AtomicBool::new(false),
            gate: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(self, url: &str, status: StatusCode, body: &'static str) -> Self {
        self.set(url, status, body);
        self
    }

    pub fn set(&self, url: &str, status: StatusCode, body: &'static str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, Bytes::from_static(body.as_bytes())));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make every fetch wait forever.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Hold every fetch until the returned gate is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            pending::<()>().await;
        }
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }
        let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        match route {
            Some((status, body)) => Ok(Response::new(status, body).with_url(request.url.clone())),
            None => Err(NetError::RequestFailed(format!("no route for {}", request.url))),
        }
    }
}

/// Storage that fails reads or writes on demand.
#[derive(Debug, Default)]
pub struct FaultyStorage {
    inner: MemoryCacheStorage,
    fail_reads: bool,
    fail_writes: bool,
}

impl FaultyStorage {
    /// Every `put` and `update` fails.
    pub fn read_only(inner: MemoryCacheStorage) -> Self {
        Self {
            inner,
            fail_reads: false,
            fail_writes: true,
        }
    }

    /// Every `match_in` fails.
    pub fn unreadable(inner: MemoryCacheStorage) -> Self {
        Self {
            inner,
            fail_reads: true,
            fail_writes: false,
        }
    }

    fn write_error(&self) -> CacheResult<()> {
        if self.fail_writes {
            return Err(CacheError::Storage("quota exceeded".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for FaultyStorage {
    async fn open(&self, name: &str) -> CacheResult<()> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        self.inner.has(name).await
    }

    async fn put(&self, name: &str, key: CacheKey, response: Response) -> CacheResult<()> {
        self.write_error()?;
        self.inner.put(name, key, response).await
    }

    async fn update(&self, name: &str, key: CacheKey, response: Response) -> CacheResult<bool> {
        self.write_error()?;
        self.inner.update(name, key, response).await
    }

    async fn match_in(&self, name: &str, key: &CacheKey) -> CacheResult<Option<Response>> {
        if self.fail_reads {
            return Err(CacheError::Storage("disk I/O error".to_string()));
        }
        self.inner.match_in(name, key).await
    }

    async fn entries(&self, name: &str) -> CacheResult<Vec<CacheKey>> {
        self.inner.entries(name).await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        self.inner.delete(name).await
    }
}
