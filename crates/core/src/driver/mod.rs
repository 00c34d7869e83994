//! The top-level agent: owns every loaded version, pins clients to them and
//! routes host events.
//!
//! The host feeds events in through the `on_*` entry points. Each returns a
//! [`Background`] bundle of work (idle triggers, deferred cache writes) that
//! must be driven to completion even after a response has been delivered.

pub mod messages;
pub mod state;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::FutureExt;
use http::HeaderName;
use serde_json::Value;

use crate::Error;
use crate::adapter::STORE_ROOT;
use crate::assets::{CACHE_BUST_PARAM, CachedResource, UpdateCacheStatus, UpdateSource};
use crate::cache::Table;
use crate::context::{Background, FetchContext};
use crate::debug::{DebugSnapshot, DebugVersion};
use crate::manifest::{Manifest, ManifestHash};
use crate::net::{Request, RequestCache, RequestMode, Response, safe_fetch};
use crate::scope::Scope;
use crate::version::AppVersion;

pub use messages::{Clients, InboundMessage, NotificationClick, OutboundMessage, VersionDescriptor};
pub use state::{ControlState, ReadyState};

use state::{DriverState, NOMINAL};

/// Header or query parameter that makes the agent ignore a request.
pub const BYPASS_FLAG: &str = "outpost-bypass";
/// Scope-relative path of the diagnostic page.
pub const DEBUG_STATE_PATH: &str = "outpost/state";

/// Result of a fetch event.
#[derive(Debug)]
pub struct FetchOutcome {
    /// `Ok(None)` means the agent declined the request and the host should
    /// let it go to the network untouched.
    pub response: Result<Option<Response>, Error>,
    pub background: Background,
}

impl FetchOutcome {
    fn passthrough(background: Background) -> Self {
        Self { response: Ok(None), background }
    }
}

struct Inner {
    scope: Scope,
    clients: Arc<dyn Clients>,
    manifest_path: String,
    debug_path: String,
    state: Mutex<DriverState>,
    /// Serializes writes of the control record.
    persist: tokio::sync::Mutex<()>,
    /// One update check at a time, so a manifest is installed once.
    updating: tokio::sync::Mutex<()>,
    initialized: tokio::sync::OnceCell<Result<(), Error>>,
    nav_update_scheduled: AtomicBool,
    logged_only_if_cached: AtomicBool,
    bust_counter: AtomicU64,
}

/// Cheap handle to one agent instance.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("scope", &self.inner.scope.adapter.scope_url())
            .field("readiness", &self.readiness())
            .finish()
    }
}

impl Driver {
    pub fn new(scope: Scope, clients: Arc<dyn Clients>, manifest_path: impl Into<String>) -> Self {
        let debug_path = scope.adapter.scoped_path(DEBUG_STATE_PATH);
        Self {
            inner: Arc::new(Inner {
                scope,
                clients,
                manifest_path: manifest_path.into(),
                debug_path,
                state: Mutex::new(DriverState::default()),
                persist: tokio::sync::Mutex::new(()),
                updating: tokio::sync::Mutex::new(()),
                initialized: tokio::sync::OnceCell::new(),
                nav_update_scheduled: AtomicBool::new(false),
                logged_only_if_cached: AtomicBool::new(false),
                bust_counter: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn readiness(&self) -> ReadyState {
        self.lock().readiness
    }

    pub fn latest_hash(&self) -> Option<ManifestHash> {
        self.lock().latest.clone()
    }

    /// Hashes of every loaded version, in load order.
    pub fn version_hashes(&self) -> Vec<ManifestHash> {
        self.lock()
            .versions
            .iter()
            .map(|v| v.manifest_hash().to_string())
            .collect()
    }

    pub fn version(&self, hash: &str) -> Option<Arc<AppVersion>> {
        self.lock().version(hash).cloned()
    }

    /// Version a client is pinned to.
    pub fn assignment(&self, client_id: &str) -> Option<ManifestHash> {
        self.lock().assignments.get(client_id).cloned()
    }

    fn idle_trigger(&self) -> impl Future<Output = ()> + Send + 'static {
        let idle = self.inner.scope.idle.clone();
        async move { idle.trigger().await }
    }

    // -- lifecycle ---------------------------------------------------------

    /// The agent takes over as soon as it is installed.
    pub fn on_install(&self) {
        tracing::info!(scope = %self.inner.scope.adapter.scope_url(), "agent installed, skipping waiting");
    }

    /// Schedule removal of stores left by older agent formats and start
    /// initialization without holding up activation.
    pub fn on_activate(&self) -> Background {
        let driver = self.clone();
        self.inner.scope.idle.schedule(
            "activate: cleanup-legacy-caches",
            Box::new(move || {
                async move {
                    if let Err(err) = driver.cleanup_legacy_caches().await {
                        driver
                            .inner
                            .scope
                            .debug
                            .log(&err, "cleanup_legacy_caches @ activate: cleanup-legacy-caches");
                    }
                    Ok(())
                }
                .boxed()
            }),
        );
        self.on_message(InboundMessage::Initialize, None)
    }

    /// Initialize once per instance. A failure leaves the driver in safe
    /// mode and is returned to every caller.
    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        self.inner
            .initialized
            .get_or_init(|| async {
                let result = self.initialize().await;
                if let Err(err) = &result {
                    tracing::error!("initialization failed, entering safe mode: {err}");
                    self.lock()
                        .set_readiness(ReadyState::SafeMode, format!("Initialization failed due to error: {err}"));
                }
                result
            })
            .await
            .clone()
    }

    async fn control_table(&self) -> Result<Arc<dyn Table>, Error> {
        let scope = &self.inner.scope;
        scope.storage.open_table(&scope.table_name("control")).await
    }

    async fn initialize(&self) -> Result<(), Error> {
        let table = self.control_table().await?;

        let control = match ControlState::read(table.as_ref()).await {
            Ok(control) => {
                let driver = self.clone();
                self.inner.scope.idle.schedule(
                    "init post-load (update, cleanup)",
                    Box::new(move || {
                        async move {
                            driver.check_for_update().await;
                            if let Err(err) = driver.cleanup_caches().await {
                                driver.inner.scope.debug.log(&err, "cleanup_caches @ init post-load");
                            }
                            Ok(())
                        }
                        .boxed()
                    }),
                );
                control
            }
            Err(err) => {
                tracing::info!("no usable persisted state, bootstrapping from the network: {err}");
                if !matches!(err, Error::Invariant(_)) {
                    self.inner.scope.debug.log(&err, "initialize: read from storage");
                }
                let manifest = self
                    .fetch_latest_manifest(false)
                    .await?
                    .ok_or_else(|| Error::Invariant("manifest fetch returned nothing".to_string()))?;
                self.ensure_supported(&manifest).await?;
                let hash = manifest.hash()?;
                let control = ControlState::fresh(hash, manifest);
                control.write(table.as_ref()).await?;
                control
            }
        };

        let mut versions = Vec::with_capacity(control.manifests.len());
        for (hash, manifest) in &control.manifests {
            versions.push(AppVersion::open(self.inner.scope.clone(), manifest.clone(), hash.clone()).await?);
        }

        {
            let mut state = self.lock();
            state.versions = versions.clone();
            for (client_id, hash) in &control.assignments {
                if state.version(hash).is_some() {
                    state.assignments.insert(client_id.clone(), hash.clone());
                } else {
                    self.inner.scope.debug.log(
                        format!("Unknown version {hash} mapped for client {client_id}, using latest instead"),
                        "initialize: map assignments",
                    );
                    state.assignments.insert(client_id.clone(), control.latest.clone());
                }
            }
            state.latest = Some(control.latest.clone());
        }

        tracing::info!(latest = %control.latest, versions = versions.len(), "driver initialized");

        for version in versions {
            self.schedule_initialization(version).await;
        }
        Ok(())
    }

    /// Fully initialize `version` during the next idle period, or right away
    /// when serving a local development scope.
    async fn schedule_initialization(&self, version: Arc<AppVersion>) {
        if self.inner.scope.adapter.is_localhost() {
            self.initialize_version(version).await;
            return;
        }
        let driver = self.clone();
        let desc = format!("initialization({})", version.manifest_hash());
        self.inner.scope.idle.schedule(
            desc,
            Box::new(move || {
                async move {
                    driver.initialize_version(version).await;
                    Ok(())
                }
                .boxed()
            }),
        );
    }

    async fn initialize_version(&self, version: Arc<AppVersion>) {
        if let Err(err) = version.initialize_fully(None).await {
            self.inner
                .scope
                .debug
                .log(&err, &format!("initialize_fully for {}", version.manifest_hash()));
            self.version_failed(&version, &err).await;
        }
    }

    /// Take a broken version out of service. Clients of a broken latest
    /// version are unpinned; clients of an older one move to latest.
    pub async fn version_failed(&self, version: &Arc<AppVersion>, err: &Error) {
        {
            let mut state = self.lock();
            let hash = version.manifest_hash();
            let Some(known) = state.version(hash) else {
                return;
            };
            if !Arc::ptr_eq(known, version) {
                return;
            }

            let affected = state.clients_of(hash);
            tracing::error!(hash, clients = affected.len(), "version failed: {err}");
            if state.latest.as_deref() == Some(hash) {
                state.set_readiness(ReadyState::ExistingClientsOnly, format!("Degraded due to: {err}"));
                for client_id in &affected {
                    state.assignments.remove(client_id);
                }
            } else if let Some(latest) = state.latest.clone() {
                for client_id in affected {
                    state.assignments.insert(client_id, latest.clone());
                }
            }
        }

        if let Err(sync_err) = self.sync().await {
            self.inner
                .scope
                .debug
                .log(&sync_err, &format!("Driver.version_failed({err})"));
        }
    }

    /// Persist versions, assignments and latest as one record.
    async fn sync(&self) -> Result<(), Error> {
        let _persist = self.inner.persist.lock().await;
        let Some(control) = self.lock().control() else {
            return Ok(());
        };
        let table = self.control_table().await?;
        control.write(table.as_ref()).await
    }

    // -- updates -----------------------------------------------------------

    /// Fetch the manifest, bypassing any HTTP cache. With `ignore_offline`,
    /// 502, 503 and 504 answers mean "can't check now" and yield `None`. A 404
    /// means the application is gone: everything is wiped and the agent
    /// unregisters.
    async fn fetch_latest_manifest(&self, ignore_offline: bool) -> Result<Option<Manifest>, Error> {
        let scope = &self.inner.scope;
        let bust = format!(
            "{}{}",
            scope.adapter.time(),
            self.inner.bust_counter.fetch_add(1, Ordering::SeqCst)
        );
        let url = scope
            .adapter
            .resolve(&format!("{}?{CACHE_BUST_PARAM}={bust}", self.inner.manifest_path));
        let res = safe_fetch(scope.fetcher.as_ref(), &Request::get(url)).await;

        if !res.ok() {
            let status = res.status.as_u16();
            if status == 404 {
                tracing::warn!("manifest is gone, wiping all stores and unregistering");
                self.delete_all_caches().await?;
                self.inner.clients.unregister().await?;
            } else if matches!(status, 502..=504) && ignore_offline {
                return Ok(None);
            }
            return Err(Error::HttpStatus(format!("manifest fetch failed (status: {status})")));
        }

        self.lock().last_update_check = Some(scope.adapter.time());
        Manifest::from_slice(&res.body).map(Some)
    }

    /// Reject a manifest of another format, destroying every trace of the
    /// agent on the way out.
    async fn ensure_supported(&self, manifest: &Manifest) -> Result<(), Error> {
        if let Err(err) = manifest.ensure_supported() {
            tracing::error!("incompatible manifest, wiping all stores and unregistering: {err}");
            self.delete_all_caches().await?;
            self.inner.clients.unregister().await?;
            return Err(err);
        }
        Ok(())
    }

    /// Look for a new manifest and install it. Never fails; a broken update
    /// degrades the driver to existing clients only.
    pub async fn check_for_update(&self) -> bool {
        let mut hash = "(unknown)".to_string();
        match self.try_update(&mut hash).await {
            Ok(updated) => updated,
            Err(err) => {
                self.inner
                    .scope
                    .debug
                    .log(&err, &format!("Error occurred while updating to manifest {hash}"));
                self.lock().set_readiness(
                    ReadyState::ExistingClientsOnly,
                    format!("Degraded due to failed initialization: {err}"),
                );
                false
            }
        }
    }

    async fn try_update(&self, hash: &mut String) -> Result<bool, Error> {
        let _updating = self.inner.updating.lock().await;
        let Some(manifest) = self.fetch_latest_manifest(true).await? else {
            self.inner
                .scope
                .debug
                .log("Check for update aborted. (Client or server offline.)", "");
            return Ok(false);
        };

        *hash = manifest.hash()?;
        if self.lock().version(hash).is_some() {
            return Ok(false);
        }
        self.setup_update(manifest, hash.clone()).await?;
        Ok(true)
    }

    /// Install a new version as latest once it is fully cached.
    async fn setup_update(&self, manifest: Manifest, hash: ManifestHash) -> Result<(), Error> {
        self.ensure_supported(&manifest).await?;

        let version = AppVersion::open(self.inner.scope.clone(), manifest, hash.clone()).await?;
        version.initialize_fully(Some(self)).await?;

        {
            let mut state = self.lock();
            state.versions.push(version.clone());
            state.latest = Some(hash.clone());
            if state.readiness == ReadyState::ExistingClientsOnly {
                state.set_readiness(ReadyState::Normal, NOMINAL);
            }
        }
        tracing::info!(hash = %hash, "new version installed");

        self.sync().await?;
        self.notify_clients_about_update(&version).await;
        Ok(())
    }

    /// Delete every store under this agent's prefix.
    async fn delete_all_caches(&self) -> Result<(), Error> {
        let scope = &self.inner.scope;
        let own = format!("{}:", scope.adapter.cache_name_prefix());
        for name in scope.storage.names().await? {
            if name.starts_with(&own) {
                scope.storage.delete(&name).await?;
            }
        }
        Ok(())
    }

    /// Drop pinnings of clients that are gone, then every version that is
    /// neither latest nor pinned.
    pub async fn cleanup_caches(&self) -> Result<(), Error> {
        let active: HashSet<String> = self.inner.clients.client_ids().await?.into_iter().collect();

        let (obsolete, retained) = {
            let mut state = self.lock();
            state.assignments.retain(|client_id, _| active.contains(client_id));
            let used: HashSet<String> = state.assignments.values().cloned().collect();
            let latest = state.latest.clone();
            let (retained, obsolete): (Vec<_>, Vec<_>) = std::mem::take(&mut state.versions)
                .into_iter()
                .partition(|v| used.contains(v.manifest_hash()) || latest.as_deref() == Some(v.manifest_hash()));
            state.versions = retained.clone();
            (obsolete, retained)
        };

        let shared: HashSet<(String, u32)> = retained.iter().flat_map(|v| v.data_group_keys()).collect();
        for version in obsolete {
            tracing::info!(hash = version.manifest_hash(), "removing obsolete version");
            if let Err(err) = version.cleanup(&shared).await {
                self.inner
                    .scope
                    .debug
                    .log(&err, &format!("cleanup_caches - cleanup {}", version.manifest_hash()));
            }
        }

        self.sync().await
    }

    /// Delete stores named in the format of earlier agent generations, which
    /// lack the scope path after the root prefix.
    async fn cleanup_legacy_caches(&self) -> Result<(), Error> {
        let storage = &self.inner.scope.storage;
        for name in storage.names().await? {
            let legacy = name
                .strip_prefix(STORE_ROOT)
                .map(|rest| !rest.starts_with('/'))
                .unwrap_or(false);
            if legacy {
                storage.delete(&name).await?;
            }
        }
        Ok(())
    }

    // -- fetch -------------------------------------------------------------

    /// Handle a fetch event.
    pub async fn on_fetch(&self, req: Request) -> FetchOutcome {
        let scope = &self.inner.scope;
        let Ok(url) = scope.adapter.parse_url(&req.url) else {
            return FetchOutcome::passthrough(Background::new());
        };

        let bypass = req.headers.contains_key(HeaderName::from_static(BYPASS_FLAG))
            || url
                .query_pairs()
                .any(|(k, _)| k.eq_ignore_ascii_case(BYPASS_FLAG));
        if bypass {
            return FetchOutcome::passthrough(Background::new());
        }

        if url.path() == self.inner.debug_path {
            return FetchOutcome { response: Ok(Some(self.debug_response())), background: Background::new() };
        }

        if self.readiness() == ReadyState::SafeMode {
            let mut background = Background::new();
            background.push(self.idle_trigger());
            return FetchOutcome::passthrough(background);
        }

        if url.scheme() == "http" && scope.adapter.scope_url().starts_with("https:") {
            scope.debug.log(
                format!("Ignoring passive mixed content request: Driver.fetch({})", req.url),
                "",
            );
            return FetchOutcome::passthrough(Background::new());
        }

        if req.cache == RequestCache::OnlyIfCached && req.mode != RequestMode::SameOrigin {
            if !self.inner.logged_only_if_cached.swap(true, Ordering::SeqCst) {
                scope.debug.log(
                    "Ignoring invalid request: 'only-if-cached' can be set only with 'same-origin' mode",
                    &format!("Driver.fetch({}, cache: {:?}, mode: {:?})", req.url, req.cache, req.mode),
                );
            }
            return FetchOutcome::passthrough(Background::new());
        }

        let ctx = FetchContext::new();
        let response = self.handle_fetch(&req, &ctx).await.map(Some);
        let mut background = ctx.into_background();
        background.push(self.idle_trigger());
        FetchOutcome { response, background }
    }

    async fn handle_fetch(&self, req: &Request, ctx: &FetchContext) -> Result<Response, Error> {
        let fetcher = self.inner.scope.fetcher.clone();
        if self.ensure_initialized().await.is_err() {
            return Ok(safe_fetch(fetcher.as_ref(), req).await);
        }

        if req.mode == RequestMode::Navigate && !self.inner.nav_update_scheduled.swap(true, Ordering::SeqCst) {
            let driver = self.clone();
            self.inner.scope.idle.schedule(
                "check-updates-on-navigation",
                Box::new(move || {
                    async move {
                        driver.inner.nav_update_scheduled.store(false, Ordering::SeqCst);
                        driver.check_for_update().await;
                        Ok(())
                    }
                    .boxed()
                }),
            );
        }

        let Some(version) = self.assign_version(req).await? else {
            return Ok(safe_fetch(fetcher.as_ref(), req).await);
        };

        match version.handle_fetch(req, ctx).await {
            Ok(Some(res)) => Ok(res),
            Ok(None) => Ok(safe_fetch(fetcher.as_ref(), req).await),
            Err(err) => {
                if err.is_unrecoverable_state() {
                    self.notify_clients_about_unrecoverable_state(&version, &err.reason())
                        .await;
                }
                if err.is_critical() {
                    self.version_failed(&version, &err).await;
                    return Ok(safe_fetch(fetcher.as_ref(), req).await);
                }
                Err(err)
            }
        }
    }

    /// Pick the version that serves `req`, pinning new clients to latest.
    /// `None` means no version may serve it and the network should.
    async fn assign_version(&self, req: &Request) -> Result<Option<Arc<AppVersion>>, Error> {
        let Some(client_id) = req.client_id.as_deref().filter(|id| !id.is_empty()) else {
            let state = self.lock();
            if state.readiness != ReadyState::Normal {
                return Ok(None);
            }
            let latest = state.latest_hash("assign_version")?;
            return state.usable_version(&latest, "assign_version");
        };

        enum Pick {
            Pinned(Arc<AppVersion>),
            Upgrade,
            NewPin(Arc<AppVersion>),
        }

        let pick = {
            let mut state = self.lock();
            match state.assignments.get(client_id).cloned() {
                Some(hash) => {
                    let version = state.expect_version(&hash, "assign_version")?;
                    // A version that failed initialization hands its clients
                    // to latest on any request, not just navigations.
                    let upgrade = state.readiness == ReadyState::Normal
                        && state.latest.as_deref() != Some(hash.as_str())
                        && (!version.okay() || version.is_navigation_request(req));
                    if upgrade {
                        Pick::Upgrade
                    } else if version.okay() {
                        Pick::Pinned(version)
                    } else {
                        return Ok(None);
                    }
                }
                None => {
                    if state.readiness != ReadyState::Normal {
                        return Ok(None);
                    }
                    let latest = state.latest_hash("assign_version")?;
                    let Some(version) = state.usable_version(&latest, "assign_version")? else {
                        return Ok(None);
                    };
                    state.assignments.insert(client_id.to_string(), latest);
                    Pick::NewPin(version)
                }
            }
        };

        match pick {
            Pick::Pinned(version) => Ok(Some(version)),
            Pick::NewPin(version) => {
                self.sync().await?;
                Ok(Some(version))
            }
            Pick::Upgrade => {
                self.update_client(client_id).await?;
                let state = self.lock();
                let latest = state.latest_hash("assign_version")?;
                state.usable_version(&latest, "assign_version")
            }
        }
    }

    /// Move a client to the latest version and tell it so.
    async fn update_client(&self, client_id: &str) -> Result<(), Error> {
        let notice = {
            let mut state = self.lock();
            let latest = state.latest_hash("update_client")?;
            let existing = state.assignments.get(client_id).cloned();
            if existing.as_deref() == Some(latest.as_str()) {
                return Ok(());
            }

            let previous = match existing {
                Some(hash) => Some(VersionDescriptor::of(state.expect_version(&hash, "update_client")?.as_ref())),
                None => None,
            };
            let current = VersionDescriptor::of(state.expect_version(&latest, "update_client")?.as_ref());
            state.assignments.insert(client_id.to_string(), latest);
            OutboundMessage::UpdateActivated { previous, current }
        };

        self.sync().await?;
        self.inner.clients.post_message(client_id, notice).await
    }

    // -- messaging ---------------------------------------------------------

    /// Handle a message. `from` is the posting client, `None` for messages
    /// the agent sends itself. Ignored entirely in safe mode.
    pub fn on_message(&self, message: InboundMessage, from: Option<String>) -> Background {
        let mut background = Background::new();
        if self.readiness() == ReadyState::SafeMode {
            return background;
        }

        let driver = self.clone();
        match message {
            InboundMessage::Initialize => {
                background.push(async move {
                    if let Err(err) = driver.ensure_initialized().await {
                        tracing::warn!("initialization on activation failed: {err}");
                    }
                });
            }
            message => {
                let Some(client_id) = from else {
                    return background;
                };
                background.push(async move {
                    if driver.ensure_initialized().await.is_ok() {
                        driver.handle_message(message, &client_id).await;
                    }
                });
            }
        }
        background.push(self.idle_trigger());
        background
    }

    async fn handle_message(&self, message: InboundMessage, client_id: &str) {
        match message {
            InboundMessage::CheckForUpdates { status_nonce } => {
                self.check_for_update().await;
                self.report_status(client_id, Ok(()), status_nonce).await;
            }
            InboundMessage::ActivateUpdate { status_nonce } => {
                let result = self.update_client(client_id).await;
                self.report_status(client_id, result, status_nonce).await;
            }
            InboundMessage::Initialize => {}
        }
    }

    async fn report_status(&self, client_id: &str, result: Result<(), Error>, nonce: u64) {
        let message = OutboundMessage::Status { nonce, status: result.is_ok(), error: result.err().map(|e| e.to_string()) };
        self.post(client_id, message).await;
    }

    /// Relay a push payload to every client and show its notification, if
    /// it carries one with a title.
    pub fn on_push(&self, data: Value) -> Background {
        let mut background = Background::new();
        if data.is_null() {
            return background;
        }
        let driver = self.clone();
        background.push(async move { driver.handle_push(data).await });
        background
    }

    async fn handle_push(&self, data: Value) {
        self.broadcast(OutboundMessage::Push { data: data.clone() }).await;

        let desc = &data["notification"];
        let Some(title) = desc["title"].as_str().filter(|t| !t.is_empty()) else {
            return;
        };
        let options = messages::notification_options(desc);
        if let Err(err) = self.inner.clients.show_notification(title, options).await {
            tracing::warn!("failed to show notification: {err}");
            self.inner.scope.debug.log(&err, "Driver.handle_push");
        }
    }

    /// Tell every client that a notification was clicked.
    pub fn on_notification_click(&self, notification: Value, action: impl Into<String>) -> Background {
        let mut background = Background::new();
        let driver = self.clone();
        let data = NotificationClick { action: action.into(), notification: messages::notification_options(&notification) };
        background.push(async move { driver.broadcast(OutboundMessage::NotificationClick { data }).await });
        background
    }

    async fn post(&self, client_id: &str, message: OutboundMessage) {
        if let Err(err) = self.inner.clients.post_message(client_id, message).await {
            tracing::debug!(client = client_id, "failed to post message: {err}");
        }
    }

    async fn broadcast(&self, message: OutboundMessage) {
        match self.inner.clients.client_ids().await {
            Ok(ids) => {
                for id in ids {
                    self.post(&id, message.clone()).await;
                }
            }
            Err(err) => tracing::warn!("failed to list clients: {err}"),
        }
    }

    /// Offer the new version to clients pinned to an older one.
    async fn notify_clients_about_update(&self, next: &AppVersion) {
        let ids = match self.inner.clients.client_ids().await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!("failed to list clients: {err}");
                return;
            }
        };
        let available = VersionDescriptor::of(next);

        for id in ids {
            let current = {
                let state = self.lock();
                match state.assignments.get(&id) {
                    Some(hash) if state.latest.as_deref() != Some(hash.as_str()) => {
                        state.version(hash).map(|v| VersionDescriptor::of(v))
                    }
                    _ => None,
                }
            };
            if let Some(current) = current {
                self.post(&id, OutboundMessage::UpdateAvailable { current, available: available.clone() })
                    .await;
            }
        }
    }

    async fn notify_clients_about_unrecoverable_state(&self, version: &Arc<AppVersion>, reason: &str) {
        let affected = {
            let state = self.lock();
            match state.version(version.manifest_hash()) {
                Some(known) if Arc::ptr_eq(known, version) => state.clients_of(version.manifest_hash()),
                _ => return,
            }
        };
        for id in affected {
            self.post(&id, OutboundMessage::UnrecoverableState { reason: reason.to_string() })
                .await;
        }
    }

    // -- diagnostics -------------------------------------------------------

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let idle = &self.inner.scope.idle;
        let state = self.lock();
        DebugSnapshot {
            state: state.readiness.to_string(),
            why: state.why.clone(),
            latest_hash: state.latest.clone(),
            last_update_check: state.last_update_check,
            versions: state
                .versions
                .iter()
                .map(|v| DebugVersion { hash: v.manifest_hash().to_string(), clients: state.clients_of(v.manifest_hash()) })
                .collect(),
            idle_last_trigger: idle.last_trigger(),
            idle_last_run: idle.last_run(),
            idle_tasks: idle.task_descriptions(),
        }
    }

    /// Plain-text diagnostic page.
    pub fn debug_state(&self) -> String {
        self.inner.scope.debug.render(&self.debug_snapshot())
    }

    fn debug_response(&self) -> Response {
        Response::with_content(self.debug_state(), "text/plain")
    }
}

#[async_trait]
impl UpdateSource for Driver {
    /// Any loaded version holding `url` at `hash` will do, healthy or not.
    async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Result<Option<Response>, Error> {
        let versions = self.lock().versions.clone();
        for version in versions {
            if let Some(res) = version.lookup_resource_with_hash(url, hash).await? {
                return Ok(Some(res));
            }
        }
        Ok(None)
    }

    async fn lookup_resource_without_hash(&self, url: &str) -> Result<Option<CachedResource>, Error> {
        let latest = self.lock().latest_version();
        match latest {
            Some(version) => version.lookup_resource_without_hash(url).await,
            None => Ok(None),
        }
    }

    async fn previously_cached_resources(&self) -> Result<Vec<String>, Error> {
        let latest = self.lock().latest_version();
        match latest {
            Some(version) => version.previously_cached_resources().await,
            None => Ok(Vec::new()),
        }
    }

    async fn recent_cache_status(&self, url: &str) -> Result<UpdateCacheStatus, Error> {
        let latest = self.lock().latest_version();
        match latest {
            Some(version) => version.recent_cache_status(url).await,
            None => Ok(UpdateCacheStatus::NotCached),
        }
    }
}
