//! Install/activate pipeline and cache generation management.
//!
//! ```text
//! Parsed ──install──▶ Installing ──▶ Installed ──activate──▶ Activating ──▶ Activated
//!                                                                               │
//!                                                     newer version activated ──▶ Redundant
//! ```
//!
//! Each event is one sequential pipeline. Running either again for the same
//! version is redundant but harmless.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tauler_common::truncate_for_log;
use tauler_net::Fetcher;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{add_all, CacheError, CacheStorage};
use crate::clients::{broadcast, Clients};
use crate::config::WorkerConfig;
use crate::messages::OutboundMessage;

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    /// Constructed, no lifecycle event yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed, waiting to be activated.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Superseded by a newer version. Writes nothing to the cache.
    Redundant,
}

/// Events the host runtime has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// State changed.
    StateChange(WorkerState),
    /// Activate now instead of waiting for existing pages to close.
    SkipWaiting,
    /// Pages claimed during activation.
    ClientsClaimed { count: usize },
}

/// Result of pre-caching one manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precache {
    Cached(usize),
    Failed(CacheError),
}

/// What an install did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub static_assets: Precache,
    pub dynamic_assets: Precache,
}

/// What an activation did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivateReport {
    /// Superseded generations that were removed.
    pub deleted: Vec<String>,
    pub claimed: usize,
    pub notified: usize,
}

/// Lifecycle manager for one worker version.
pub struct Lifecycle {
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
    event_tx: mpsc::UnboundedSender<HostEvent>,
}

impl Lifecycle {
    /// Create a lifecycle manager and the receiver for its host events.
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<dyn Clients>,
    ) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                storage,
                fetcher,
                clients,
                state: RwLock::new(WorkerState::Parsed),
                skip_waiting: AtomicBool::new(false),
                event_tx,
            },
            event_rx,
        )
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Ask the host to activate without waiting.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
        self.emit(HostEvent::SkipWaiting);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Run the install pipeline.
    ///
    /// Pre-caching is best-effort: a manifest that fails is logged and the
    /// install still completes. Pages are told about the update concurrently.
    pub async fn install(&self) -> InstallReport {
        let cache_name = self.config.cache_name();
        info!(version = %self.config.version, cache = %cache_name, "Installing");
        self.set_state(WorkerState::Installing).await;

        let clients = Arc::clone(&self.clients);
        let version = self.config.version;
        tokio::spawn(async move {
            broadcast(clients.as_ref(), OutboundMessage::UpdateAvailable { version }).await;
        });

        if let Err(e) = self.storage.open(&cache_name).await {
            warn!(cache = %cache_name, error = %e, "Could not open cache generation");
        }

        debug!("Pre-caching static assets");
        let static_assets = self.precache(&cache_name, &self.config.static_urls()).await;
        if let Precache::Failed(ref e) = static_assets {
            warn!(error = %e, "Some static assets could not be cached");
        }

        debug!("Pre-caching dynamic assets");
        let dynamic_assets = self.precache(&cache_name, &self.config.dynamic_urls()).await;
        if let Precache::Failed(ref e) = dynamic_assets {
            warn!(error = %e, "Some dynamic assets could not be cached");
        }

        self.set_state(WorkerState::Installed).await;
        info!("Install complete, activating immediately");
        self.skip_waiting();

        InstallReport {
            cache_name,
            static_assets,
            dynamic_assets,
        }
    }

    /// Run the activate pipeline.
    ///
    /// Deletes superseded generations, claims every page, then announces the
    /// version. Each step finishes before the next starts.
    pub async fn activate(&self) -> ActivateReport {
        info!(version = %self.config.version, "Activating");
        self.set_state(WorkerState::Activating).await;

        let current = self.config.cache_name();
        let deleted = self
            .delete_generations(|name| name != current && self.config.is_owned(name))
            .await;

        debug!("Claiming clients");
        let claimed = self.clients.claim().await;
        self.emit(HostEvent::ClientsClaimed { count: claimed });

        let notified = broadcast(
            self.clients.as_ref(),
            OutboundMessage::Activated {
                version: self.config.version,
            },
        )
        .await;

        self.set_state(WorkerState::Activated).await;
        info!(version = %self.config.version, claimed, "Active and controlling");

        ActivateReport {
            deleted,
            claimed,
            notified,
        }
    }

    /// Mark this version as superseded.
    pub async fn retire(&self) {
        info!(version = %self.config.version, "Superseded, now redundant");
        self.set_state(WorkerState::Redundant).await;
    }

    /// Delete every generation we own, the current one included.
    pub async fn clear_generations(&self) -> Vec<String> {
        self.delete_generations(|name| self.config.is_owned(name)).await
    }

    async fn precache(&self, cache_name: &str, urls: &[url::Url]) -> Precache {
        match add_all(self.storage.as_ref(), self.fetcher.as_ref(), cache_name, urls).await {
            Ok(count) => Precache::Cached(count),
            Err(e) => {
                if let CacheError::AddAll { ref failed } = e {
                    for url in failed {
                        debug!(url = %truncate_for_log(url, 50), "Not cached");
                    }
                }
                Precache::Failed(e)
            }
        }
    }

    async fn delete_generations(&self, should_delete: impl Fn(&str) -> bool) -> Vec<String> {
        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Could not list cache generations");
                return Vec::new();
            }
        };

        let mut deleted = Vec::new();
        for name in names.into_iter().filter(|name| should_delete(name.as_str())) {
            match self.storage.delete(&name).await {
                Ok(true) => {
                    info!(cache = %name, "Deleted cache generation");
                    deleted.push(name);
                }
                Ok(false) => {}
                Err(e) => warn!(cache = %name, error = %e, "Could not delete cache generation"),
            }
        }
        deleted
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        self.emit(HostEvent::StateChange(state));
    }

    fn emit(&self, event: HostEvent) {
        // The host may have stopped listening.
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, MemoryCacheStorage};
    use crate::clients::ClientList;
    use crate::testing::{FaultyStorage, StubFetcher};
    use http::StatusCode;
    use url::Url;

    fn small_config() -> WorkerConfig {
        WorkerConfig {
            static_assets: vec!["https://chessboardjs.com/img/chesspieces/wikipedia/wP.png".into()],
            dynamic_assets: vec!["./".into(), "./index.html".into(), "./app.js".into()],
            ..Default::default()
        }
    }

    fn online_fetcher() -> StubFetcher {
        StubFetcher::new()
            .with(
                "https://chessboardjs.com/img/chesspieces/wikipedia/wP.png",
                StatusCode::OK,
                "png",
            )
            .with("https://eltauler.app/", StatusCode::OK, "<html>root")
            .with("https://eltauler.app/index.html", StatusCode::OK, "<html>index")
            .with("https://eltauler.app/app.js", StatusCode::OK, "app")
    }

    struct Harness {
        lifecycle: Lifecycle,
        events: mpsc::UnboundedReceiver<HostEvent>,
        storage: MemoryCacheStorage,
        clients: ClientList,
    }

    fn harness(config: WorkerConfig, fetcher: StubFetcher) -> Harness {
        let storage = MemoryCacheStorage::new();
        let clients = ClientList::new();
        let (lifecycle, events) = Lifecycle::new(
            Arc::new(config),
            Arc::new(storage.clone()),
            Arc::new(fetcher),
            Arc::new(clients.clone()),
        );
        Harness {
            lifecycle,
            events,
            storage,
            clients,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<HostEvent>) -> Vec<HostEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_install_populates_generation() {
        let mut h = harness(small_config(), online_fetcher());
        assert_eq!(h.lifecycle.state().await, WorkerState::Parsed);

        let report = h.lifecycle.install().await;

        assert_eq!(report.cache_name, "eltauler-2.0.1736268000");
        assert_eq!(report.static_assets, Precache::Cached(1));
        assert_eq!(report.dynamic_assets, Precache::Cached(3));
        assert_eq!(h.storage.entries(&report.cache_name).await.unwrap().len(), 4);
        assert_eq!(h.lifecycle.state().await, WorkerState::Installed);
        assert!(h.lifecycle.skip_waiting_requested());

        assert_eq!(
            drain(&mut h.events),
            vec![
                HostEvent::StateChange(WorkerState::Installing),
                HostEvent::StateChange(WorkerState::Installed),
                HostEvent::SkipWaiting,
            ]
        );
    }

    #[tokio::test]
    async fn test_install_survives_failed_manifest() {
        let fetcher = StubFetcher::new()
            .with("https://eltauler.app/", StatusCode::OK, "<html>root")
            .with("https://eltauler.app/index.html", StatusCode::OK, "<html>index")
            .with("https://eltauler.app/app.js", StatusCode::OK, "app");
        let h = harness(small_config(), fetcher);

        let report = h.lifecycle.install().await;

        assert!(matches!(report.static_assets, Precache::Failed(CacheError::AddAll { .. })));
        assert_eq!(report.dynamic_assets, Precache::Cached(3));
        assert_eq!(h.lifecycle.state().await, WorkerState::Installed);
        assert!(h.lifecycle.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_install_survives_storage_failure() {
        let (lifecycle, mut events) = Lifecycle::new(
            Arc::new(small_config()),
            Arc::new(FaultyStorage::read_only(MemoryCacheStorage::new())),
            Arc::new(online_fetcher()),
            Arc::new(ClientList::new()),
        );

        let report = lifecycle.install().await;

        assert!(matches!(report.static_assets, Precache::Failed(CacheError::Storage(_))));
        assert!(matches!(report.dynamic_assets, Precache::Failed(CacheError::Storage(_))));
        assert_eq!(lifecycle.state().await, WorkerState::Installed);
        assert!(lifecycle.skip_waiting_requested());
        assert!(drain(&mut events).contains(&HostEvent::SkipWaiting));
    }

    #[tokio::test]
    async fn test_retire_marks_redundant() {
        let mut h = harness(small_config(), online_fetcher());
        h.lifecycle.install().await;
        h.lifecycle.activate().await;
        drain(&mut h.events);

        h.lifecycle.retire().await;

        assert_eq!(h.lifecycle.state().await, WorkerState::Redundant);
        assert_eq!(
            drain(&mut h.events),
            vec![HostEvent::StateChange(WorkerState::Redundant)]
        );
    }

    #[tokio::test]
    async fn test_install_offline_still_completes() {
        let fetcher = online_fetcher();
        fetcher.set_online(false);
        let h = harness(small_config(), fetcher);

        let report = h.lifecycle.install().await;

        assert!(matches!(report.static_assets, Precache::Failed(_)));
        assert!(matches!(report.dynamic_assets, Precache::Failed(_)));
        // The generation is still created.
        assert!(h.storage.has(&report.cache_name).await.unwrap());
        assert_eq!(h.lifecycle.state().await, WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let h = harness(small_config(), online_fetcher());

        let first = h.lifecycle.install().await;
        let mut before = h.storage.entries(&first.cache_name).await.unwrap();
        let second = h.lifecycle.install().await;
        let mut after = h.storage.entries(&second.cache_name).await.unwrap();

        before.sort_by(|a, b| a.url().cmp(b.url()));
        after.sort_by(|a, b| a.url().cmp(b.url()));
        assert_eq!(before, after);
        assert_eq!(h.storage.keys().await.unwrap().len(), 1);

        let key = CacheKey::get(&Url::parse("https://eltauler.app/index.html").unwrap());
        let body = h.storage.match_in(&second.cache_name, &key).await.unwrap().unwrap();
        assert_eq!(body.text(), "<html>index");
    }

    #[tokio::test]
    async fn test_install_announces_update() {
        let h = harness(small_config(), online_fetcher());
        let (_client, mut rx) = h.clients.connect(Url::parse("https://eltauler.app/").unwrap()).await;

        h.lifecycle.install().await;

        assert_eq!(
            rx.recv().await,
            Some(OutboundMessage::UpdateAvailable {
                version: Default::default()
            })
        );
    }

    #[tokio::test]
    async fn test_activate_deletes_superseded_generations() {
        let mut h = harness(small_config(), online_fetcher());
        h.storage.open("eltauler-2.0.1700000000").await.unwrap();
        h.storage.open("eltauler-1.9.1600000000").await.unwrap();
        h.storage.open("another-app-v1").await.unwrap();
        h.lifecycle.install().await;
        drain(&mut h.events);

        let (client, mut rx) = h.clients.connect(Url::parse("https://eltauler.app/").unwrap()).await;
        let report = h.lifecycle.activate().await;

        let mut deleted = report.deleted.clone();
        deleted.sort();
        assert_eq!(deleted, vec!["eltauler-1.9.1600000000", "eltauler-2.0.1700000000"]);
        assert_eq!(report.claimed, 1);
        assert_eq!(report.notified, 1);

        let mut names = h.storage.keys().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["another-app-v1", "eltauler-2.0.1736268000"]);

        assert!(h.clients.is_controlled(client.id()).await);
        assert_eq!(h.lifecycle.state().await, WorkerState::Activated);

        // The install-time update notice may or may not have landed first.
        let mut received = Vec::new();
        while let Ok(message) = rx.try_recv() {
            received.push(message);
        }
        assert!(received.contains(&OutboundMessage::Activated {
            version: Default::default()
        }));
        assert_eq!(
            drain(&mut h.events),
            vec![
                HostEvent::StateChange(WorkerState::Activating),
                HostEvent::ClientsClaimed { count: 1 },
                HostEvent::StateChange(WorkerState::Activated),
            ]
        );
    }

    #[tokio::test]
    async fn test_activate_with_nothing_to_delete() {
        let h = harness(small_config(), online_fetcher());

        let report = h.lifecycle.activate().await;
        assert!(report.deleted.is_empty());
        assert_eq!(report.claimed, 0);

        let again = h.lifecycle.activate().await;
        assert_eq!(again, report);
    }

    #[tokio::test]
    async fn test_clear_generations_only_touches_owned() {
        let h = harness(small_config(), online_fetcher());
        h.lifecycle.install().await;
        h.storage.open("eltauler-2.0.1").await.unwrap();
        h.storage.open("another-app-v1").await.unwrap();

        let mut deleted = h.lifecycle.clear_generations().await;
        deleted.sort();
        assert_eq!(deleted, vec!["eltauler-2.0.1", "eltauler-2.0.1736268000"]);
        assert_eq!(h.storage.keys().await.unwrap(), vec!["another-app-v1"]);
    }
}
