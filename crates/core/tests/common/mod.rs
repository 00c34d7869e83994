//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use http::header::{self, HeaderValue};
use serde_json::{Map, Value, json};

use outpost_core::cache::hash::sha1_hex;
use outpost_core::driver::OutboundMessage;
use outpost_core::idle::{IDLE_DELAY, MAX_IDLE_DELAY};
use outpost_core::{Adapter, Clients, Driver, Error, Fetcher, ManualClock, MemoryStorage, Request, Response, Scope};

pub const SCOPE: &str = "https://example.com/";

/// Serves canned responses by URL (ignoring the query) and records every
/// request it sees.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    offline: AtomicBool,
}

impl MockFetcher {
    pub fn serve(&self, url: &str, res: Response) {
        self.routes.lock().unwrap().insert(url.to_string(), res);
    }

    pub fn serve_text(&self, url: &str, body: &str) {
        self.serve(url, Response::with_content(body.to_string(), "text/plain"));
    }

    pub fn serve_status(&self, url: &str, status: StatusCode) {
        self.serve(url, Response::new(status, ""));
    }

    pub fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests whose URL (without query) equals `url`.
    pub fn count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| strip_query(u) == url)
            .count()
    }

    pub fn total(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn reset_counts(&self) {
        self.requests.lock().unwrap().clear();
    }
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, req: &Request) -> Result<Response, Error> {
        self.requests.lock().unwrap().push(req.url.clone());
        let base = strip_query(&req.url).to_string();
        let delay = self.delays.lock().unwrap().get(&base).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Network("offline".into()));
        }
        let routes = self.routes.lock().unwrap();
        match routes.get(&req.url).or_else(|| routes.get(&base)) {
            Some(res) => Ok(res.clone().with_url(req.url.clone())),
            None => Ok(Response::new(StatusCode::NOT_FOUND, "")),
        }
    }
}

/// Client registry that records everything posted to it.
#[derive(Default)]
pub struct RecordingClients {
    ids: Mutex<Vec<String>>,
    inbox: Mutex<Vec<(String, OutboundMessage)>>,
    notifications: Mutex<Vec<(String, Map<String, Value>)>>,
    unregistered: AtomicBool,
}

impl RecordingClients {
    pub fn connect(&self, id: &str) {
        self.ids.lock().unwrap().push(id.to_string());
    }

    pub fn disconnect(&self, id: &str) {
        self.ids.lock().unwrap().retain(|c| c != id);
    }

    pub fn messages_for(&self, id: &str) -> Vec<OutboundMessage> {
        self.inbox
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn all_messages(&self) -> Vec<OutboundMessage> {
        self.inbox.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn notifications(&self) -> Vec<(String, Map<String, Value>)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn unregistered(&self) -> bool {
        self.unregistered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clients for RecordingClients {
    async fn client_ids(&self) -> Result<Vec<String>, Error> {
        Ok(self.ids.lock().unwrap().clone())
    }

    async fn post_message(&self, client_id: &str, message: OutboundMessage) -> Result<(), Error> {
        self.inbox.lock().unwrap().push((client_id.to_string(), message));
        Ok(())
    }

    async fn unregister(&self) -> Result<(), Error> {
        self.unregistered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn show_notification(&self, title: &str, options: Map<String, Value>) -> Result<(), Error> {
        self.notifications.lock().unwrap().push((title.to_string(), options));
        Ok(())
    }
}

/// One deployable build of the test application.
pub struct Build {
    pub files: Vec<(&'static str, String)>,
    pub app_data: Option<Value>,
    pub config_version: u32,
}

impl Build {
    pub fn new(tag: &str) -> Self {
        Self {
            files: vec![
                ("/index.html", format!("<html>{tag}</html>")),
                ("/main.js", format!("main {tag}")),
                ("/lazy/chunk.js", format!("chunk {tag}")),
            ],
            app_data: None,
            config_version: 1,
        }
    }

    pub fn body(&self, path: &str) -> &str {
        self.files
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, b)| b.as_str())
            .unwrap_or("")
    }

    pub fn manifest(&self) -> Value {
        let hashes: Map<String, Value> = self
            .files
            .iter()
            .map(|(path, body)| (path.to_string(), Value::String(sha1_hex(body.as_bytes()))))
            .collect();
        let mut manifest = json!({
            "configVersion": self.config_version,
            "index": "/index.html",
            "assetGroups": [
                {"name": "app", "installMode": "prefetch", "urls": ["/index.html", "/main.js"], "patterns": []},
                {"name": "lazy", "installMode": "lazy", "urls": ["/lazy/chunk.js"], "patterns": []},
                {"name": "media", "installMode": "lazy", "urls": [], "patterns": ["^/img/.*$"]}
            ],
            "dataGroups": [
                {"name": "api", "patterns": ["/api/"], "strategy": "performance", "maxSize": 3, "maxAge": 60000}
            ],
            "hashTable": hashes,
        });
        if let Some(app_data) = &self.app_data {
            manifest["appData"] = app_data.clone();
        }
        manifest
    }

    /// Publish this build on the mock server.
    pub fn deploy(&self, fetcher: &MockFetcher) {
        for (path, body) in &self.files {
            let content_type = if path.ends_with(".html") { "text/html" } else { "application/javascript" };
            fetcher.serve(&format!("https://example.com{path}"), Response::with_content(body.clone(), content_type));
        }
        fetcher.serve(
            "https://example.com/outpost.json",
            Response::with_content(self.manifest().to_string(), "application/json")
                .with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        );
    }
}

pub struct Harness {
    pub driver: Driver,
    pub fetcher: Arc<MockFetcher>,
    pub clients: Arc<RecordingClients>,
    pub storage: MemoryStorage,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new(), Arc::new(MockFetcher::default()))
    }

    /// A fresh agent instance over existing storage, as after a restart.
    pub fn with_storage(storage: MemoryStorage, fetcher: Arc<MockFetcher>) -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let clients = Arc::new(RecordingClients::default());
        let adapter = Adapter::new(SCOPE, clock.clone()).unwrap();
        let scope = Scope::new(adapter, Arc::new(storage.clone()), fetcher.clone(), IDLE_DELAY, MAX_IDLE_DELAY);
        let driver = Driver::new(scope, clients.clone(), "outpost.json");
        Self { driver, fetcher, clients, storage, clock }
    }

    pub fn restart(&self) -> Self {
        Self::with_storage(self.storage.clone(), self.fetcher.clone())
    }

    /// Fetch and drive all background work to completion.
    pub async fn fetch(&self, req: Request) -> Result<Option<Response>, Error> {
        let outcome = self.driver.on_fetch(req).await;
        outcome.background.wait().await;
        outcome.response
    }

    pub async fn fetch_text(&self, req: Request) -> String {
        self.fetch(req)
            .await
            .unwrap()
            .map(|r| r.text())
            .unwrap_or_default()
    }

    /// Run every queued idle task now.
    pub async fn drain_idle(&self) {
        self.driver.scope().idle.execute().await;
    }

    /// Initialize the driver and run its deferred version initialization.
    pub async fn boot(&self) {
        self.driver.ensure_initialized().await.unwrap();
        self.drain_idle().await;
    }
}

pub fn url(path: &str) -> String {
    format!("https://example.com{path}")
}
