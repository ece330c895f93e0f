//! # Tauler SW
//!
//! Offline asset worker for the El Tauler chess PWA.
//!
//! ## Features
//!
//! - **Fetch routing**: every GET is classified as network-first (documents,
//!   scripts, styles) or cache-first (images, fonts, piece sprites)
//! - **Cache generations**: one named generation per deployed version,
//!   pre-populated on install and garbage-collected on activate
//! - **Page messaging**: version queries, forced activation, cache clearing
//!   and update notifications
//!
//! ## Architecture
//!
//! ```text
//! OfflineWorker
//!     ├── Classifier ──▶ Executor (network-first | cache-first)
//!     │                      └── CacheStorage (current generation)
//!     ├── Lifecycle (install / activate)
//!     │       ├── CacheStorage (all generations)
//!     │       └── Clients (broadcast, claim)
//!     └── ControlChannel (page messages)
//! ```

use thiserror::Error;

pub mod cache;
pub mod classifier;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod messages;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cache::{add_all, CacheError, CacheKey, CacheStorage, MemoryCacheStorage};
pub use classifier::{Classifier, Strategy};
pub use clients::{ClientHandle, ClientList, Clients};
pub use config::{BuildVersion, StrategyRules, WorkerConfig};
pub use lifecycle::{ActivateReport, HostEvent, InstallReport, Lifecycle, Precache, WorkerState};
pub use messages::{ControlChannel, ControlMessage, OutboundMessage};
pub use strategy::{Executor, FetchOutcome, ResponseSource};
pub use worker::OfflineWorker;

pub use tauler_net::{Fetcher, HttpFetcher, NetError, Request, RequestMode, Response};

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl SwError {
    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            SwError::Config(_) => "config",
            SwError::Network(_) => "network",
            SwError::Cache(_) => "cache",
        }
    }
}
