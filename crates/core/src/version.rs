//! One deployed version of the application, as described by a manifest.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::Error;
use crate::assets::{AssetGroup, CachedResource, HashTable, UpdateCacheStatus, UpdateSource};
use crate::context::FetchContext;
use crate::data::DataGroup;
use crate::manifest::{Manifest, ManifestHash, NavigationRequestStrategy};
use crate::net::{Request, RequestMode, Response};
use crate::scope::Scope;

/// Asset and data groups of one manifest, plus its navigation rules.
pub struct AppVersion {
    scope: Scope,
    manifest: Manifest,
    manifest_hash: ManifestHash,
    hash_table: Arc<HashTable>,
    asset_groups: Vec<Arc<AssetGroup>>,
    data_groups: Vec<Arc<DataGroup>>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    index_url: String,
    okay: AtomicBool,
}

impl std::fmt::Debug for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppVersion")
            .field("hash", &self.manifest_hash)
            .field("okay", &self.okay())
            .field("asset_groups", &self.asset_groups.len())
            .field("data_groups", &self.data_groups.len())
            .finish()
    }
}

impl AppVersion {
    pub async fn open(scope: Scope, manifest: Manifest, manifest_hash: ManifestHash) -> Result<Arc<Self>, Error> {
        let hash_table: Arc<HashTable> = Arc::new(
            manifest
                .hash_table
                .iter()
                .map(|(url, hash)| (scope.adapter.normalize_url(url), hash.clone()))
                .collect(),
        );

        let asset_prefix = format!("{manifest_hash}:assets");
        let mut asset_groups = Vec::with_capacity(manifest.asset_groups.len());
        for config in &manifest.asset_groups {
            asset_groups
                .push(AssetGroup::open(scope.clone(), config.clone(), hash_table.clone(), &asset_prefix).await?);
        }

        let mut data_groups = Vec::with_capacity(manifest.data_groups.len());
        for config in &manifest.data_groups {
            data_groups.push(DataGroup::open(scope.clone(), config.clone()).await?);
        }

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        for rule in manifest.effective_navigation_urls() {
            let regex = Regex::new(&rule.regex)
                .map_err(|e| Error::InvalidManifest(format!("bad navigation pattern {:?}: {e}", rule.regex)))?;
            if rule.positive {
                include.push(regex);
            } else {
                exclude.push(regex);
            }
        }

        let index_url = scope.adapter.normalize_url(&manifest.index);
        Ok(Arc::new(Self {
            scope,
            manifest,
            manifest_hash,
            hash_table,
            asset_groups,
            data_groups,
            include,
            exclude,
            index_url,
            okay: AtomicBool::new(true),
        }))
    }

    /// False once installation has failed; such a version must not serve.
    pub fn okay(&self) -> bool {
        self.okay.load(Ordering::SeqCst)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn manifest_hash(&self) -> &str {
        &self.manifest_hash
    }

    /// Opaque application data carried by the manifest.
    pub fn app_data(&self) -> Option<&Value> {
        self.manifest.app_data.as_ref()
    }

    /// Initialize every asset group in declaration order. Any failure marks
    /// the version as not okay.
    pub async fn initialize_fully(&self, update_from: Option<&dyn UpdateSource>) -> Result<(), Error> {
        for group in &self.asset_groups {
            if let Err(err) = group.initialize_fully(update_from).await {
                tracing::warn!(version = %self.manifest_hash, group = group.name(), "initialization failed: {err}");
                self.okay.store(false, Ordering::SeqCst);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Answer `req` from this version. `None` means no group claimed it and
    /// it is not a navigation to fall back to the index for.
    pub async fn handle_fetch(&self, req: &Request, ctx: &FetchContext) -> Result<Option<Response>, Error> {
        if let Some(res) = self.serve_from_groups(req, ctx).await? {
            return Ok(Some(res));
        }

        if self.scope.adapter.normalize_url(&req.url) == self.index_url || !self.is_navigation_request(req) {
            return Ok(None);
        }

        if self.manifest.navigation_request_strategy == Some(NavigationRequestStrategy::Freshness) {
            match self.scope.fetcher.fetch(req).await {
                Ok(res) => return Ok(Some(res)),
                Err(err) => {
                    tracing::debug!(url = %req.url, "navigation fetch failed, serving index: {err}");
                }
            }
        }

        let index = Request::get(self.scope.adapter.resolve(&self.index_url));
        self.serve_from_groups(&index, ctx).await
    }

    async fn serve_from_groups(&self, req: &Request, ctx: &FetchContext) -> Result<Option<Response>, Error> {
        for group in &self.asset_groups {
            if let Some(res) = group.handle_fetch(req).await? {
                return Ok(Some(res));
            }
        }
        for group in &self.data_groups {
            if let Some(res) = group.handle_fetch(req, ctx).await? {
                return Ok(Some(res));
            }
        }
        Ok(None)
    }

    /// A navigation to an application route, as opposed to a file.
    pub fn is_navigation_request(&self, req: &Request) -> bool {
        if req.mode != RequestMode::Navigate || !req.accepts_text_html() {
            return false;
        }

        let scope = self.scope.adapter.scope_url();
        let prefix = scope.strip_suffix('/').unwrap_or(scope);
        let url = req.url.strip_prefix(prefix).unwrap_or(&req.url);
        let path = url.split(['?', '#']).next().unwrap_or(url);

        self.include.iter().any(|r| r.is_match(path)) && !self.exclude.iter().any(|r| r.is_match(path))
    }

    /// `(name, version)` of every data group; their stores are shared by all
    /// versions declaring the same pair.
    pub fn data_group_keys(&self) -> HashSet<(String, u32)> {
        self.manifest
            .data_groups
            .iter()
            .map(|g| (g.name.clone(), g.version))
            .collect()
    }

    /// Delete this version's stores. Data groups whose `(name, version)`
    /// appears in `shared` are still used elsewhere and are kept.
    pub async fn cleanup(&self, shared: &HashSet<(String, u32)>) -> Result<(), Error> {
        for group in &self.asset_groups {
            group.cleanup().await?;
        }
        for (group, config) in self.data_groups.iter().zip(&self.manifest.data_groups) {
            if shared.contains(&(config.name.clone(), config.version)) {
                continue;
            }
            group.cleanup().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl UpdateSource for AppVersion {
    async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Result<Option<Response>, Error> {
        if self.hash_table.get(url).map(String::as_str) != Some(hash) {
            return Ok(None);
        }
        Ok(self
            .lookup_resource_without_hash(url)
            .await?
            .map(|cached| cached.response))
    }

    async fn lookup_resource_without_hash(&self, url: &str) -> Result<Option<CachedResource>, Error> {
        for group in &self.asset_groups {
            if let Some(cached) = group.fetch_from_cache_only(url).await? {
                return Ok(Some(cached));
            }
        }
        Ok(None)
    }

    async fn previously_cached_resources(&self) -> Result<Vec<String>, Error> {
        let mut resources = Vec::new();
        for group in &self.asset_groups {
            resources.extend(group.unhashed_resources().await?);
        }
        Ok(resources)
    }

    async fn recent_cache_status(&self, url: &str) -> Result<UpdateCacheStatus, Error> {
        let mut status = UpdateCacheStatus::NotCached;
        for group in &self.asset_groups {
            match group.cache_status(url).await? {
                UpdateCacheStatus::Cached => return Ok(UpdateCacheStatus::Cached),
                UpdateCacheStatus::NotCached => {}
                other => status = other,
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Adapter, ManualClock};
    use crate::cache::{MemoryStorage, Storage};
    use crate::cache::hash::sha1_hex;
    use crate::debug::DebugLog;
    use crate::idle::{IDLE_DELAY, IdleScheduler, MAX_IDLE_DELAY};
    use crate::net::Fetcher;
    use http::StatusCode;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Site {
        pages: Mutex<HashMap<String, String>>,
        offline: AtomicBool,
    }

    impl Site {
        fn page(&self, url: &str, body: &str) {
            self.pages.lock().unwrap().insert(url.to_string(), body.to_string());
        }
    }

    #[async_trait]
    impl Fetcher for Site {
        async fn fetch(&self, req: &Request) -> Result<Response, Error> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::Network("offline".into()));
            }
            let base = req.url.split('?').next().unwrap_or(&req.url);
            match self.pages.lock().unwrap().get(base) {
                Some(body) => Ok(Response::with_content(body.clone(), "text/html")),
                None => Ok(Response::new(StatusCode::NOT_FOUND, "")),
            }
        }
    }

    fn manifest(strategy: Option<&str>) -> Manifest {
        let strategy = strategy
            .map(|s| format!(r#", "navigationRequestStrategy": "{s}""#))
            .unwrap_or_default();
        Manifest::from_slice(
            format!(
                r#"{{
                    "configVersion": 1,
                    "index": "/index.html",
                    "assetGroups": [
                        {{"name": "app", "installMode": "prefetch", "urls": ["/index.html", "/main.js"], "patterns": []}}
                    ],
                    "dataGroups": [
                        {{"name": "api", "patterns": ["/api/"], "strategy": "freshness", "maxSize": 5, "maxAge": 1000}}
                    ],
                    "hashTable": {{"/index.html": "{}", "/main.js": "{}"}}{strategy}
                }}"#,
                sha1_hex(b"<html>index</html>"),
                sha1_hex(b"main"),
            )
            .as_bytes(),
        )
        .unwrap()
    }

    async fn version(strategy: Option<&str>) -> (Arc<AppVersion>, Arc<Site>, MemoryStorage) {
        let clock = Arc::new(ManualClock::new(0));
        let site = Arc::new(Site::default());
        site.page("https://example.com/index.html", "<html>index</html>");
        site.page("https://example.com/main.js", "main");
        site.page("https://example.com/api/items", "[]");
        site.page("https://example.com/dashboard", "<html>server dashboard</html>");

        let storage = MemoryStorage::new();
        let debug = Arc::new(DebugLog::new(clock.clone()));
        let scope = Scope {
            adapter: Adapter::new("https://example.com/", clock.clone()).unwrap(),
            storage: Arc::new(storage.clone()),
            fetcher: site.clone(),
            idle: Arc::new(IdleScheduler::new(clock.clone(), IDLE_DELAY, MAX_IDLE_DELAY, debug.clone())),
            debug,
        };
        let manifest = manifest(strategy);
        let hash = manifest.hash().unwrap();
        let v = AppVersion::open(scope, manifest, hash).await.unwrap();
        v.initialize_fully(None).await.unwrap();
        (v, site, storage)
    }

    async fn fetch(v: &AppVersion, req: Request) -> Option<Response> {
        v.handle_fetch(&req, &FetchContext::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_navigation_served_from_index() {
        let (v, site, _) = version(None).await;
        site.offline.store(true, Ordering::SeqCst);

        let res = fetch(&v, Request::navigate("https://example.com/dashboard")).await.unwrap();
        assert_eq!(res.text(), "<html>index</html>");
    }

    #[tokio::test]
    async fn test_freshness_navigation_prefers_network() {
        let (v, site, _) = version(Some("freshness")).await;
        let res = fetch(&v, Request::navigate("https://example.com/dashboard")).await.unwrap();
        assert_eq!(res.text(), "<html>server dashboard</html>");

        site.offline.store(true, Ordering::SeqCst);
        let res = fetch(&v, Request::navigate("https://example.com/dashboard")).await.unwrap();
        assert_eq!(res.text(), "<html>index</html>");
    }

    #[tokio::test]
    async fn test_file_like_navigation_not_rewritten() {
        let (v, _, _) = version(None).await;
        assert!(fetch(&v, Request::navigate("https://example.com/robots.txt")).await.is_none());
        assert!(fetch(&v, Request::navigate("https://example.com/__admin")).await.is_none());
        // Not a navigation at all.
        assert!(fetch(&v, Request::get("https://example.com/dashboard")).await.is_none());
    }

    #[tokio::test]
    async fn test_navigation_rules_ignore_query() {
        let (v, _, _) = version(None).await;
        assert!(v.is_navigation_request(&Request::navigate("https://example.com/search?q=a.b")));
        assert!(!v.is_navigation_request(&Request::navigate("https://example.com/file.pdf?x=1")));
    }

    #[tokio::test]
    async fn test_data_groups_consulted_after_assets() {
        let (v, _, _) = version(None).await;
        let res = fetch(&v, Request::get("https://example.com/api/items")).await.unwrap();
        assert_eq!(res.text(), "[]");
        let res = fetch(&v, Request::get("https://example.com/main.js")).await.unwrap();
        assert_eq!(res.text(), "main");
    }

    #[tokio::test]
    async fn test_update_source_lookups() {
        let (v, _, _) = version(None).await;
        let hash = sha1_hex(b"main");
        assert!(v.lookup_resource_with_hash("/main.js", &hash).await.unwrap().is_some());
        assert!(v.lookup_resource_with_hash("/main.js", "nope").await.unwrap().is_none());
        assert_eq!(v.recent_cache_status("/main.js").await.unwrap(), UpdateCacheStatus::Cached);
        assert_eq!(v.recent_cache_status("/other.js").await.unwrap(), UpdateCacheStatus::NotCached);
        assert!(v.previously_cached_resources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_initialization_marks_not_okay() {
        let (v, site, _) = version(None).await;
        assert!(v.okay());
        site.pages.lock().unwrap().clear();

        let other = AppVersion::open(v.scope.clone(), manifest(Some("performance")), "other".into())
            .await
            .unwrap();
        assert!(other.initialize_fully(None).await.is_err());
        assert!(!other.okay());
    }

    #[tokio::test]
    async fn test_version_that_failed_initialization_is_not_usable() {
        use crate::driver::state::DriverState;

        let (v, site, _) = version(None).await;
        site.pages.lock().unwrap().clear();
        let broken = AppVersion::open(v.scope.clone(), manifest(Some("performance")), "broken".into())
            .await
            .unwrap();
        assert!(broken.initialize_fully(None).await.is_err());

        let state = DriverState { versions: vec![v.clone(), broken], ..DriverState::default() };
        assert!(state.usable_version(v.manifest_hash(), "test").unwrap().is_some());
        assert!(state.usable_version("broken", "test").unwrap().is_none());
        assert!(state.usable_version("missing", "test").is_err());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_shared_data_groups() {
        let (v, _, storage) = version(None).await;
        fetch(&v, Request::get("https://example.com/api/items")).await;

        v.cleanup(&v.data_group_keys()).await.unwrap();
        let names = storage.names().await.unwrap();
        assert!(names.iter().all(|n| n.contains(":data:dynamic:api:")));
        assert!(!names.is_empty());

        v.cleanup(&HashSet::new()).await.unwrap();
        assert!(storage.names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_app_data() {
        let (v, _, _) = version(None).await;
        assert!(v.app_data().is_none());
    }
}
