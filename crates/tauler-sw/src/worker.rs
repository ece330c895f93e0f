//! The worker façade the host runtime talks to.

use std::sync::Arc;

use serde_json::Value;
use tauler_net::{Fetcher, Request};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::cache::CacheStorage;
use crate::classifier::Classifier;
use crate::clients::{ClientHandle, Clients};
use crate::config::{BuildVersion, WorkerConfig};
use crate::lifecycle::{ActivateReport, HostEvent, InstallReport, Lifecycle, WorkerState};
use crate::messages::{ControlChannel, ControlMessage};
use crate::strategy::{Executor, FetchOutcome};
use crate::SwError;

/// Offline asset worker for one deployed version.
pub struct OfflineWorker {
    config: Arc<WorkerConfig>,
    classifier: Classifier,
    executor: Executor,
    lifecycle: Arc<Lifecycle>,
    channel: ControlChannel,
}

impl OfflineWorker {
    /// Build a worker from its configuration and collaborators.
    ///
    /// Returns the receiver for events the host has to act on.
    pub fn new(
        config: WorkerConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<dyn Clients>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<HostEvent>), SwError> {
        config.validate()?;
        let classifier = Classifier::new(&config.rules)?;
        let config = Arc::new(config);

        info!(version = %config.version, cache = %config.cache_name(), "Service worker version");

        let executor = Executor::new(Arc::clone(&config), Arc::clone(&storage), Arc::clone(&fetcher));
        let (lifecycle, events) = Lifecycle::new(Arc::clone(&config), storage, fetcher, clients);
        let lifecycle = Arc::new(lifecycle);
        let channel = ControlChannel::new(config.version, Arc::clone(&lifecycle));

        Ok((
            Self {
                config,
                classifier,
                executor,
                lifecycle,
                channel,
            },
            events,
        ))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn version(&self) -> BuildVersion {
        self.config.version
    }

    pub fn cache_name(&self) -> String {
        self.config.cache_name()
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.state().await
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.lifecycle.skip_waiting_requested()
    }

    /// Handle an intercepted request.
    ///
    /// Returns `None` for requests the worker does not touch (non-GET, or not
    /// http(s)); the host performs those itself.
    pub async fn handle_fetch(&self, request: &Request) -> Option<FetchOutcome> {
        if !request.is_http() {
            trace!(url = %request.url, "Ignoring non-http request");
            return None;
        }
        if request.method != http::Method::GET {
            trace!(url = %request.url, method = %request.method, "Passing through");
            return None;
        }

        let strategy = self.classifier.classify(request.url.as_str());
        debug!(url = %request.url, ?strategy, "Fetch intercepted");
        Some(self.executor.execute(strategy, request).await)
    }

    /// Install event.
    pub async fn install(&self) -> InstallReport {
        self.lifecycle.install().await
    }

    /// Activate event.
    pub async fn activate(&self) -> ActivateReport {
        self.lifecycle.activate().await
    }

    /// The host activated a newer version.
    ///
    /// Background refreshes still in flight are dropped instead of written.
    pub async fn retire(&self) {
        self.executor.retire();
        self.lifecycle.retire().await;
    }

    /// Message event from a page.
    pub async fn handle_message(&self, source: Option<&ClientHandle>, data: &Value) -> Option<ControlMessage> {
        self.channel.handle(source, data).await
    }
}
