//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tauler_common::{init_logging, LogConfig};
use tauler_sw::{
    ClientList, Fetcher, HostEvent, MemoryCacheStorage, NetError, OfflineWorker, Request, Response,
    WorkerConfig,
};
use tokio::sync::{mpsc, Notify};

pub const ORIGIN: &str = "https://eltauler.app/";

/// A network that serves every URL it knows about and can be unplugged.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    routes: Mutex<Vec<(String, StatusCode, Bytes)>>,
    offline: AtomicBool,
    hanging: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
    requests: AtomicUsize,
}

impl FakeNetwork {
    pub fn serve(&self, url: &str, body: &[u8]) {
        let mut routes = self.routes.lock().unwrap();
        routes.retain(|(u, _, _)| u != url);
        routes.push((url.to_string(), StatusCode::OK, Bytes::copy_from_slice(body)));
    }

    pub fn unplug(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn plug_in(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }

    pub fn hang(&self) {
        self.hanging.store(true, Ordering::SeqCst);
    }

    /// Hold every request until the returned gate is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }
        let routes = self.routes.lock().unwrap();
        match routes.iter().find(|(u, _, _)| u == request.url.as_str()) {
            Some((_, status, body)) => Ok(Response::new(*status, body.clone())),
            None => Ok(Response::new(StatusCode::NOT_FOUND, "")),
        }
    }
}

/// Network serving every asset in the default manifests.
pub fn full_network(config: &WorkerConfig) -> FakeNetwork {
    let network = FakeNetwork::default();
    for url in config.static_urls().iter().chain(config.dynamic_urls().iter()) {
        network.serve(url.as_str(), format!("body of {url}").as_bytes());
    }
    network
}

pub struct Deployment {
    pub worker: OfflineWorker,
    pub events: mpsc::UnboundedReceiver<HostEvent>,
}

pub fn deploy(
    config: WorkerConfig,
    storage: &MemoryCacheStorage,
    network: &Arc<FakeNetwork>,
    clients: &ClientList,
) -> Deployment {
    init_logging(LogConfig::debug().with_filter("tauler_sw=debug"));
    let (worker, events) = OfflineWorker::new(
        config,
        Arc::new(storage.clone()),
        network.clone(),
        Arc::new(clients.clone()),
    )
    .unwrap();
    Deployment { worker, events }
}

pub fn request(url: &str) -> Request {
    Request::parse(url).unwrap()
}
