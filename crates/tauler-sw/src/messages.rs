//! Control channel between the worker and its pages.
//!
//! Inbound messages come either as a bare string (`"getVersion"`) or as an
//! object with a `type` field (`{"type": "GET_VERSION"}`). Both forms are
//! accepted. Anything else is ignored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clients::ClientHandle;
use crate::config::BuildVersion;
use crate::lifecycle::Lifecycle;

/// Messages the worker posts to pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// A new version took control.
    #[serde(rename = "SW_ACTIVATED")]
    Activated { version: BuildVersion },

    /// A new version finished installing.
    #[serde(rename = "SW_UPDATE_AVAILABLE")]
    UpdateAvailable { version: BuildVersion },

    /// Reply to a version query.
    #[serde(rename = "SW_VERSION")]
    Version { version: BuildVersion },

    /// Reply to a clear-cache request.
    #[serde(rename = "CACHE_CLEARED")]
    CacheCleared,
}

impl OutboundMessage {
    /// JSON payload as posted to the page.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Recognized inbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    SkipWaiting,
    GetVersion,
    ClearCache,
}

impl ControlMessage {
    /// Recognize a message in either wire form.
    pub fn parse(data: &Value) -> Option<Self> {
        match data {
            Value::String(s) => match s.as_str() {
                "skipWaiting" => Some(Self::SkipWaiting),
                "getVersion" => Some(Self::GetVersion),
                "clearCache" => Some(Self::ClearCache),
                _ => None,
            },
            Value::Object(map) => match map.get("type").and_then(Value::as_str)? {
                "SKIP_WAITING" => Some(Self::SkipWaiting),
                "GET_VERSION" => Some(Self::GetVersion),
                "CLEAR_CACHE" => Some(Self::ClearCache),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Stateless handler for page messages.
pub struct ControlChannel {
    version: BuildVersion,
    lifecycle: Arc<Lifecycle>,
}

impl ControlChannel {
    pub fn new(version: BuildVersion, lifecycle: Arc<Lifecycle>) -> Self {
        Self { version, lifecycle }
    }

    /// Handle one message from `source`.
    ///
    /// Replies go only to `source`. Without a source the side effect still
    /// happens and the reply is dropped. Returns the recognized message.
    pub async fn handle(&self, source: Option<&ClientHandle>, data: &Value) -> Option<ControlMessage> {
        let Some(message) = ControlMessage::parse(data) else {
            debug!(%data, "Ignoring unrecognized message");
            return None;
        };

        debug!(?message, client = ?source.map(ClientHandle::id), "Message received");

        match message {
            ControlMessage::SkipWaiting => {
                info!("Skip waiting requested");
                self.lifecycle.skip_waiting();
            }
            ControlMessage::GetVersion => {
                reply(
                    source,
                    OutboundMessage::Version {
                        version: self.version,
                    },
                );
            }
            ControlMessage::ClearCache => {
                info!("Clearing all caches");
                let deleted = self.lifecycle.clear_generations().await;
                info!(deleted = deleted.len(), "Caches cleared");
                reply(source, OutboundMessage::CacheCleared);
            }
        }

        Some(message)
    }
}

fn reply(source: Option<&ClientHandle>, message: OutboundMessage) {
    match source {
        Some(client) => {
            client.post_message(message);
        }
        None => debug!(?message, "No sender to reply to"),
    }
}
