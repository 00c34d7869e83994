//! Messages exchanged with controlled clients, and the host's client registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;
use crate::version::AppVersion;

/// Notification fields forwarded to the host; anything else is dropped.
pub const NOTIFICATION_OPTION_NAMES: [&str; 15] = [
    "actions",
    "badge",
    "body",
    "data",
    "dir",
    "icon",
    "image",
    "lang",
    "renotify",
    "requireInteraction",
    "silent",
    "tag",
    "timestamp",
    "title",
    "vibrate",
];

/// Message received from a client, or from the agent to itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// Sent by the agent to itself on activation.
    Initialize,
    CheckForUpdates {
        #[serde(rename = "statusNonce")]
        status_nonce: u64,
    },
    ActivateUpdate {
        #[serde(rename = "statusNonce")]
        status_nonce: u64,
    },
}

/// A version as presented to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    pub hash: String,
    #[serde(rename = "appData", default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<Value>,
}

impl VersionDescriptor {
    pub fn of(version: &AppVersion) -> Self {
        Self { hash: version.manifest_hash().to_string(), app_data: version.app_data().cloned() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationClick {
    pub action: String,
    pub notification: Map<String, Value>,
}

/// Message posted to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    Status {
        nonce: u64,
        status: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    UpdateAvailable {
        current: VersionDescriptor,
        available: VersionDescriptor,
    },
    UpdateActivated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<VersionDescriptor>,
        current: VersionDescriptor,
    },
    UnrecoverableState {
        reason: String,
    },
    Push {
        data: Value,
    },
    NotificationClick {
        data: NotificationClick,
    },
}

/// The host's view of the browsing contexts this agent controls.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Ids of every currently active client.
    async fn client_ids(&self) -> Result<Vec<String>, Error>;

    async fn post_message(&self, client_id: &str, message: OutboundMessage) -> Result<(), Error>;

    /// Remove the agent's registration; it will not be started again.
    async fn unregister(&self) -> Result<(), Error>;

    async fn show_notification(&self, title: &str, options: Map<String, Value>) -> Result<(), Error>;
}

/// Keep only the whitelisted notification options of `desc`.
pub fn notification_options(desc: &Value) -> Map<String, Value> {
    let Some(fields) = desc.as_object() else {
        return Map::new();
    };
    NOTIFICATION_OPTION_NAMES
        .iter()
        .filter_map(|name| fields.get(*name).map(|v| (name.to_string(), v.clone())))
        .collect()
}
