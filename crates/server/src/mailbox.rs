//! In-process stand-in for the browsing contexts an agent controls.
//!
//! Clients appear when they first issue a request or message and stay until
//! they are closed. Messages posted to them wait here until collected.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use outpost_core::{Clients, Error, OutboundMessage};

/// A notification the agent asked the host to display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShownNotification {
    pub title: String,
    pub options: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct Mailbox {
    inboxes: Mutex<BTreeMap<String, Vec<OutboundMessage>>>,
    notifications: Mutex<Vec<ShownNotification>>,
    unregistered: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Mailbox {
    pub fn connect(&self, client_id: &str) {
        lock(&self.inboxes).entry(client_id.to_string()).or_default();
    }

    /// Close a client, dropping anything it has not collected.
    pub fn disconnect(&self, client_id: &str) -> bool {
        lock(&self.inboxes).remove(client_id).is_some()
    }

    /// Take every message waiting for `client_id`.
    pub fn drain(&self, client_id: &str) -> Vec<OutboundMessage> {
        lock(&self.inboxes)
            .get_mut(client_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub fn take_notifications(&self) -> Vec<ShownNotification> {
        std::mem::take(&mut *lock(&self.notifications))
    }

    pub fn is_unregistered(&self) -> bool {
        self.unregistered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clients for Mailbox {
    async fn client_ids(&self) -> Result<Vec<String>, Error> {
        Ok(lock(&self.inboxes).keys().cloned().collect())
    }

    async fn post_message(&self, client_id: &str, message: OutboundMessage) -> Result<(), Error> {
        match lock(&self.inboxes).get_mut(client_id) {
            Some(inbox) => {
                inbox.push(message);
                Ok(())
            }
            None => Err(Error::InvalidInput(format!("no such client: {client_id}"))),
        }
    }

    async fn unregister(&self) -> Result<(), Error> {
        tracing::warn!("agent unregistered itself");
        self.unregistered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn show_notification(&self, title: &str, options: Map<String, Value>) -> Result<(), Error> {
        lock(&self.notifications).push(ShownNotification { title: title.to_string(), options });
        Ok(())
    }
}
