//! Static asset groups.
//!
//! An asset group owns one response cache and one metadata table for a named
//! set of URLs (listed explicitly or matched by pattern). Resources listed in
//! the manifest's hash table are pinned: once cached with matching content
//! they are served unconditionally. Everything else is governed by HTTP
//! freshness headers and revalidated in the background when stale.
//!
//! The two install modes differ only in [`AssetGroup::initialize_fully`]:
//! prefetch groups download everything up front ([`prefetch`]), lazy groups
//! only migrate what an older version already had ([`lazy`]).

pub mod lazy;
pub mod prefetch;
pub mod staleness;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use http::StatusCode;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::hash::sha1_hex;
use crate::cache::{ResponseCache, Table};
use crate::manifest::{AssetGroupConfig, InstallMode, compile_patterns};
use crate::net::{Request, Response, safe_fetch};
use crate::scope::Scope;

/// Redirects followed for a single asset before giving up.
pub const REDIRECT_LIMIT: usize = 3;

/// Query parameter appended to defeat intermediate HTTP caches.
pub const CACHE_BUST_PARAM: &str = "outpost-cache-bust";

/// Normalized URL to expected content hash.
pub type HashTable = HashMap<String, String>;

/// How much a previous version made use of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateCacheStatus {
    NotCached,
    CachedButUnused,
    Cached,
}

/// Metadata kept for unhashed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMeta {
    pub ts: i64,
    pub used: bool,
}

/// A cached response together with its metadata, if any.
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub response: Response,
    pub metadata: Option<AssetMeta>,
}

/// Read-only view of previously installed content, used when a new version
/// is initialized so unchanged resources need not be downloaded again.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// A cached copy of `url` whose content is known to hash to `hash`.
    async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Result<Option<Response>, Error>;

    /// Any cached copy of `url`, regardless of content.
    async fn lookup_resource_without_hash(&self, url: &str) -> Result<Option<CachedResource>, Error>;

    /// Normalized URLs of every cached resource that has no content hash.
    async fn previously_cached_resources(&self) -> Result<Vec<String>, Error>;

    async fn recent_cache_status(&self, url: &str) -> Result<UpdateCacheStatus, Error>;
}

type InFlight = Shared<BoxFuture<'static, Result<Response, Error>>>;

pub struct AssetGroup {
    config: AssetGroupConfig,
    scope: Scope,
    hashes: Arc<HashTable>,
    /// Normalized listed URLs.
    urls: Vec<String>,
    patterns: Vec<Regex>,
    prefix: String,
    cache_name: String,
    meta_name: String,
    cache: Arc<dyn ResponseCache>,
    metadata: Arc<dyn Table>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    bust_counter: AtomicU64,
}

impl std::fmt::Debug for AssetGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetGroup")
            .field("name", &self.config.name)
            .field("install_mode", &self.config.install_mode)
            .field("cache", &self.cache_name)
            .finish()
    }
}

impl AssetGroup {
    /// Open the group's stores. `prefix` scopes them to one manifest hash.
    pub async fn open(
        scope: Scope,
        config: AssetGroupConfig,
        hashes: Arc<HashTable>,
        prefix: &str,
    ) -> Result<Arc<Self>, Error> {
        let urls = config.urls.iter().map(|u| scope.adapter.normalize_url(u)).collect();
        let patterns = compile_patterns(&config.patterns)?;
        let cache_name = scope.cache_name(&format!("{prefix}:{}:cache", config.name));
        let meta_name = scope.table_name(&format!("{prefix}:{}:meta", config.name));
        let cache = scope.storage.open_cache(&cache_name).await?;
        let metadata = scope.storage.open_table(&meta_name).await?;

        Ok(Arc::new(Self {
            config,
            scope,
            hashes,
            urls,
            patterns,
            prefix: prefix.to_string(),
            cache_name,
            meta_name,
            cache,
            metadata,
            in_flight: Mutex::new(HashMap::new()),
            bust_counter: AtomicU64::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn install_mode(&self) -> InstallMode {
        self.config.install_mode
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether a normalized URL belongs to this group.
    pub fn owns(&self, url: &str) -> bool {
        self.urls.iter().any(|u| u == url) || self.patterns.iter().any(|p| p.is_match(url))
    }

    /// Key a request URL is stored under.
    fn cache_key(&self, url: &str) -> String {
        let ignore_search = self
            .config
            .cache_query_options
            .map(|o| o.ignore_search)
            .unwrap_or(false);
        match self.scope.adapter.parse_url(url) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                if ignore_search {
                    parsed.set_query(None);
                }
                parsed.to_string()
            }
            Err(_) => url.to_string(),
        }
    }

    async fn read_meta(&self, key: &str) -> Option<AssetMeta> {
        match self.metadata.read_as::<AssetMeta>(key).await {
            Ok(meta) => meta,
            Err(err) => {
                tracing::debug!(group = %self.config.name, key, "unreadable asset metadata: {err}");
                None
            }
        }
    }

    /// Serve a request if it belongs to this group, `None` otherwise.
    pub async fn handle_fetch(self: &Arc<Self>, req: &Request) -> Result<Option<Response>, Error> {
        let url = self.scope.adapter.normalize_url(&req.url);
        if !self.owns(&url) {
            return Ok(None);
        }

        let key = self.cache_key(&req.url);
        if let Some(cached) = self.cache.get(&key).await? {
            if self.hashes.contains_key(&url) {
                tracing::debug!(group = %self.config.name, url = %url, "serving hash-pinned asset from cache");
                return Ok(Some(cached));
            }

            if self.need_to_revalidate(&key, &cached).await {
                let this = self.clone();
                let revalidate = Request::get(req.url.clone());
                self.scope.idle.schedule(
                    format!("revalidate({}, {}): {}", self.prefix, self.config.name, req.url),
                    Box::new(move || {
                        async move { this.fetch_and_cache_once(revalidate, true).await.map(|_| ()) }.boxed()
                    }),
                );
            }
            return Ok(Some(cached));
        }

        // Credentials and mode of the original request are not honoured for
        // assets; the agent issues its own plain request.
        let res = self
            .fetch_and_cache_once(Request::get(req.url.clone()), true)
            .await?;
        Ok(Some(res))
    }

    async fn need_to_revalidate(&self, key: &str, res: &Response) -> bool {
        let cached_at = self.read_meta(key).await.map(|m| m.ts);
        staleness::needs_revalidation(res, cached_at, self.scope.adapter.time())
    }

    /// Whether and how a resource is cached in this group.
    pub async fn cache_status(&self, url: &str) -> Result<UpdateCacheStatus, Error> {
        let key = self.cache_key(url);
        if self.cache.get(&key).await?.is_none() {
            return Ok(UpdateCacheStatus::NotCached);
        }
        match self.read_meta(&key).await {
            Some(meta) if !meta.used => Ok(UpdateCacheStatus::CachedButUnused),
            _ => Ok(UpdateCacheStatus::Cached),
        }
    }

    /// Drop every store this group owns.
    pub async fn cleanup(&self) -> Result<(), Error> {
        self.scope.storage.delete(&self.cache_name).await?;
        self.scope.storage.delete(&self.meta_name).await?;
        Ok(())
    }

    /// Cached response and metadata for `url`, without touching the network.
    pub async fn fetch_from_cache_only(&self, url: &str) -> Result<Option<CachedResource>, Error> {
        let key = self.cache_key(url);
        let Some(response) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        let metadata = self.read_meta(&key).await;
        Ok(Some(CachedResource { response, metadata }))
    }

    /// Normalized URLs of cached resources that have no content hash.
    pub async fn unhashed_resources(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .cache
            .keys()
            .await?
            .iter()
            .map(|key| self.scope.adapter.normalize_url(key))
            .filter(|url| !self.hashes.contains_key(url))
            .collect())
    }

    /// Fetch and cache `req`, sharing the work with any concurrent caller
    /// asking for the same URL.
    pub async fn fetch_and_cache_once(self: &Arc<Self>, req: Request, used: bool) -> Result<Response, Error> {
        let url = req.url.clone();
        let op = {
            let mut in_flight = self.in_flight();
            match in_flight.get(&url) {
                Some(op) => {
                    tracing::debug!(group = %self.config.name, url = %url, "joining in-flight fetch");
                    op.clone()
                }
                None => {
                    let this = self.clone();
                    let op = async move { this.fetch_and_cache(req, used).await }.boxed().shared();
                    in_flight.insert(url.clone(), op.clone());
                    op
                }
            }
        };

        let result = op.clone().await;

        let mut in_flight = self.in_flight();
        if in_flight.get(&url).is_some_and(|current| current.ptr_eq(&op)) {
            in_flight.remove(&url);
        }
        result
    }

    async fn fetch_and_cache(&self, req: Request, used: bool) -> Result<Response, Error> {
        let res = self.fetch_from_network(&req).await?;
        if !res.ok() {
            return Err(Error::HttpStatus(format!(
                "response not ok (fetch_and_cache_once): request for {} returned {}",
                req.url, res.status
            )));
        }

        let key = self.cache_key(&req.url);
        let url = self.scope.adapter.normalize_url(&req.url);
        let stored: Result<(), Error> = async {
            self.cache.put(&key, &res).await?;
            if !self.hashes.contains_key(&url) {
                let meta = AssetMeta { ts: self.scope.adapter.time(), used };
                self.metadata.write_as(&key, &meta).await?;
            }
            Ok(())
        }
        .await;

        // Without a writable cache the version can no longer be trusted.
        stored.map_err(|err| {
            Error::Critical(format!(
                "failed to update the caches for request to '{}' (fetch_and_cache_once): {err}",
                req.url
            ))
        })?;

        Ok(res)
    }

    /// Fetch a resource, following up to [`REDIRECT_LIMIT`] redirects. A
    /// hash-pinned resource is verified against the hash of the URL that was
    /// asked for, whatever URL the content finally came from, and fetched
    /// once more with a cache-busting parameter on mismatch.
    async fn fetch_from_network(&self, req: &Request) -> Result<Response, Error> {
        let url = self.scope.adapter.normalize_url(&req.url);
        let Some(canonical) = self.hashes.get(&url) else {
            return self.follow_redirects(req).await;
        };

        // A plain request first, so a warm HTTP cache can answer it.
        let mut res = self.follow_redirects(req).await?;
        if res.ok() && sha1_hex(&res.body) != *canonical {
            tracing::debug!(group = %self.config.name, url = %url, "hash mismatch, retrying with cache busting");
            let busted = Request::get(self.cache_bust(&req.url));
            res = self.follow_redirects(&busted).await?;
            if res.ok() {
                let busted_hash = sha1_hex(&res.body);
                if busted_hash != *canonical {
                    return Err(Error::Critical(format!(
                        "hash mismatch (fetch_from_network): {}: expected {canonical}, got {busted_hash} (after cache busting)",
                        req.url
                    )));
                }
            }
        }

        if res.status == StatusCode::NOT_FOUND {
            return Err(Error::UnrecoverableState(format!(
                "failed to retrieve hashed resource from the server (asset group: {} | url: {url})",
                self.config.name
            )));
        }
        Ok(res)
    }

    async fn follow_redirects(&self, req: &Request) -> Result<Response, Error> {
        let fetcher = self.scope.fetcher.as_ref();
        let mut current = req.clone();
        let mut remaining = REDIRECT_LIMIT;
        loop {
            let res = safe_fetch(fetcher, &current).await;
            let Some(location) = res.redirect_location() else {
                return Ok(res);
            };
            let next = self
                .scope
                .adapter
                .parse_url(&current.url)
                .and_then(|base| {
                    base.join(location)
                        .map_err(|e| Error::InvalidUrl(format!("{location}: {e}")))
                })?
                .to_string();
            if remaining == 0 {
                return Err(Error::Critical(format!(
                    "response hit redirect limit (fetch_from_network): request redirected too many times, next is {next}"
                )));
            }
            remaining -= 1;
            current = current.redirect_to(next);
        }
    }

    /// Copy a hash-pinned resource from an older version. Returns whether a
    /// matching copy was found.
    async fn maybe_update(&self, update_from: &dyn UpdateSource, req: &Request) -> Result<bool, Error> {
        let url = self.scope.adapter.normalize_url(&req.url);
        let Some(hash) = self.hashes.get(&url) else {
            return Ok(false);
        };
        let Some(res) = update_from.lookup_resource_with_hash(&url, hash).await? else {
            return Ok(false);
        };

        let key = self.cache_key(&req.url);
        self.cache.put(&key, &res).await?;
        self.metadata
            .write_as(&key, &AssetMeta { ts: self.scope.adapter.time(), used: false })
            .await?;
        tracing::debug!(group = %self.config.name, url = %url, "copied resource from previous version");
        Ok(true)
    }

    fn cache_bust(&self, url: &str) -> String {
        let sep = if url.contains('?') { '&' } else { '?' };
        let nonce = self.bust_counter.fetch_add(1, Ordering::Relaxed);
        format!("{url}{sep}{CACHE_BUST_PARAM}={}{nonce}", self.scope.adapter.time())
    }

    async fn is_cached(&self, url: &str) -> Result<bool, Error> {
        Ok(self.cache.get(&self.cache_key(url)).await?.is_some())
    }

    /// Bring the group to a fully usable state, optionally reusing content
    /// from an older version.
    pub async fn initialize_fully(self: &Arc<Self>, update_from: Option<&dyn UpdateSource>) -> Result<(), Error> {
        match self.config.install_mode {
            InstallMode::Prefetch => self.initialize_prefetch(update_from).await,
            InstallMode::Lazy => self.initialize_lazy(update_from).await,
        }
    }
}
