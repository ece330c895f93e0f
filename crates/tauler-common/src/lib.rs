//! # Tauler Common
//!
//! Shared pieces for the El Tauler offline worker crates.
//!
//! ## Features
//!
//! - Timeout error with a stable category for log fields
//! - Logging configuration and setup
//! - Single-shot timeout helper (no retries)

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod timeout;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::with_timeout;

/// Errors shared across the worker crates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaulerError {
    /// Operation did not settle within its budget.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl TaulerError {
    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            TaulerError::Timeout(_) => "timeout",
        }
    }
}

/// Result type alias for shared helpers.
pub type Result<T> = std::result::Result<T, TaulerError>;

/// Shorten a URL for log lines.
///
/// Keeps the first `max` characters and appends `...` when something was cut.
pub fn truncate_for_log(url: &str, max: usize) -> String {
    match url.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &url[..idx]),
        None => url.to_string(),
    }
}
