//! Connected pages.
//!
//! The host runtime owns the set of pages. The worker only asks for it when it
//! needs to broadcast, and never persists it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};
use url::Url;

use crate::messages::OutboundMessage;

/// A page the worker can post messages to.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: String,
    url: Url,
    sender: mpsc::UnboundedSender<OutboundMessage>,
}

impl ClientHandle {
    pub fn new(id: impl Into<String>, url: Url, sender: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            id: id.into(),
            url,
            sender,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Post a message to the page.
    ///
    /// Fire-and-forget: returns `false` if the page has gone away.
    pub fn post_message(&self, message: OutboundMessage) -> bool {
        trace!(client = %self.id, ?message, "Posting message");
        self.sender.send(message).is_ok()
    }
}

/// Clients API.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Connected pages, in connection order.
    async fn match_all(&self) -> Vec<ClientHandle>;

    /// Take control of every open page. Returns how many were claimed.
    async fn claim(&self) -> usize;
}

/// Post `message` to every connected page. Returns how many accepted it.
pub async fn broadcast(clients: &dyn Clients, message: OutboundMessage) -> usize {
    let targets = clients.match_all().await;
    let delivered = targets
        .iter()
        .filter(|client| client.post_message(message.clone()))
        .count();
    debug!(?message, clients = targets.len(), delivered, "Broadcast");
    delivered
}

#[derive(Debug)]
struct ClientEntry {
    handle: ClientHandle,
    controlled: bool,
}

/// In-memory [`Clients`] backed by unbounded channels.
#[derive(Debug, Default, Clone)]
pub struct ClientList {
    clients: Arc<RwLock<Vec<ClientEntry>>>,
}

impl ClientList {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a page. The receiver yields everything posted to it.
    pub async fn connect(&self, url: Url) -> (ClientHandle, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ClientHandle::new(next_client_id(), url, sender);
        self.clients.write().await.push(ClientEntry {
            handle: handle.clone(),
            controlled: false,
        });
        debug!(client = %handle.id, url = %handle.url, "Client connected");
        (handle, receiver)
    }

    /// Remove a page.
    pub async fn disconnect(&self, id: &str) -> Option<ClientHandle> {
        let mut clients = self.clients.write().await;
        let index = clients.iter().position(|entry| entry.handle.id == id)?;
        Some(clients.remove(index).handle)
    }

    /// Whether the worker controls this page.
    pub async fn is_controlled(&self, id: &str) -> bool {
        self.clients
            .read()
            .await
            .iter()
            .any(|entry| entry.handle.id == id && entry.controlled)
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

#[async_trait]
impl Clients for ClientList {
    async fn match_all(&self) -> Vec<ClientHandle> {
        self.clients
            .read()
            .await
            .iter()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    async fn claim(&self) -> usize {
        let mut clients = self.clients.write().await;
        for entry in clients.iter_mut() {
            entry.controlled = true;
        }
        clients.len()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
