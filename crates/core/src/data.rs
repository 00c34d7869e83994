//! Dynamic data groups.
//!
//! A data group caches API-like responses under an LRU bound and a maximum
//! age, using one of two strategies:
//!
//! - **performance**: cache first, network on miss (optionally refreshing
//!   ahead of expiry in the background)
//! - **freshness**: network first, cache as fallback when the network fails
//!   or is too slow
//!
//! Both strategies race the network against an optional timeout. A fetch
//! that loses the race keeps running and populates the cache when it lands.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use http::Method;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::{ResponseCache, Table};
use crate::context::FetchContext;
use crate::lru::{EvictionList, LruState};
use crate::manifest::{DataGroupConfig, DataStrategy, compile_patterns};
use crate::net::{Request, Response, safe_fetch};
use crate::scope::Scope;

const LRU_KEY: &str = "lru";

/// Insertion time of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRecord {
    pub age: i64,
}

type NetworkFetch = Shared<BoxFuture<'static, Result<Response, Error>>>;

pub struct DataGroup {
    config: DataGroupConfig,
    scope: Scope,
    patterns: Vec<Regex>,
    cache_name: String,
    lru_name: String,
    age_name: String,
    cache: Arc<dyn ResponseCache>,
    lru_table: Arc<dyn Table>,
    age_table: Arc<dyn Table>,
    lru: tokio::sync::Mutex<EvictionList>,
}

impl std::fmt::Debug for DataGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataGroup")
            .field("name", &self.config.name)
            .field("version", &self.config.version)
            .field("strategy", &self.config.strategy)
            .finish()
    }
}

impl DataGroup {
    /// Open the group's stores and load its persisted LRU chain.
    pub async fn open(scope: Scope, config: DataGroupConfig) -> Result<Arc<Self>, Error> {
        let patterns = compile_patterns(&config.patterns)?;
        let base = format!("{}:data:dynamic:{}", config.version, config.name);
        let cache_name = scope.cache_name(&format!("{base}:cache"));
        let lru_name = scope.table_name(&format!("{base}:lru"));
        let age_name = scope.table_name(&format!("{base}:age"));

        let cache = scope.storage.open_cache(&cache_name).await?;
        let lru_table = scope.storage.open_table(&lru_name).await?;
        let age_table = scope.storage.open_table(&age_name).await?;

        let lru = match lru_table.read_as::<LruState>(LRU_KEY).await {
            Ok(Some(state)) => {
                if !state.is_consistent() {
                    tracing::warn!(group = %config.name, "repairing inconsistent LRU state");
                }
                EvictionList::from_state(state)
            }
            Ok(None) => EvictionList::new(),
            Err(err) => {
                tracing::warn!(group = %config.name, "discarding unreadable LRU state: {err}");
                EvictionList::new()
            }
        };

        Ok(Arc::new(Self {
            config,
            scope,
            patterns,
            cache_name,
            lru_name,
            age_name,
            cache,
            lru_table,
            age_table,
            lru: tokio::sync::Mutex::new(lru),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn label(&self) -> String {
        format!("DataGroup({}@{})", self.config.name, self.config.version)
    }

    /// Cache key of a request; HEAD responses are stored apart from GET.
    fn cache_key(&self, method: &Method, url: &str) -> String {
        let ignore_search = self
            .config
            .cache_query_options
            .map(|o| o.ignore_search)
            .unwrap_or(false);
        let url = if ignore_search {
            url.split(['?', '#']).next().unwrap_or(url)
        } else {
            url
        };
        if *method == Method::HEAD {
            format!("HEAD {url}")
        } else {
            url.to_string()
        }
    }

    /// Serve a request if it matches this group, `None` otherwise.
    pub async fn handle_fetch(self: &Arc<Self>, req: &Request, ctx: &FetchContext) -> Result<Option<Response>, Error> {
        if !self.patterns.iter().any(|p| p.is_match(&req.url)) {
            return Ok(None);
        }

        match req.method {
            // Part of a mutating exchange, but not cacheable itself.
            Method::OPTIONS => Ok(None),
            Method::GET | Method::HEAD => match self.config.strategy {
                DataStrategy::Performance => self.handle_with_performance(req, ctx).await.map(Some),
                DataStrategy::Freshness => self.handle_with_freshness(req, ctx).await.map(Some),
            },
            _ => {
                {
                    let mut lru = self.lru.lock().await;
                    if lru.remove(&req.url) {
                        self.clear_cache_for_url(&req.url).await?;
                    }
                    self.sync_lru(&lru).await;
                }
                Ok(Some(safe_fetch(self.scope.fetcher.as_ref(), req).await))
            }
        }
    }

    async fn handle_with_performance(self: &Arc<Self>, req: &Request, ctx: &FetchContext) -> Result<Response, Error> {
        if let Some((res, age)) = self.load_from_cache(req, true).await? {
            if let Some(ahead) = self.config.refresh_ahead_ms {
                if age >= ahead as i64 {
                    tracing::debug!(group = %self.config.name, url = %req.url, age, "refreshing ahead of expiry");
                    let this = self.clone();
                    let refresh = req.clone();
                    ctx.wait_until(async move {
                        let res = safe_fetch(this.scope.fetcher.as_ref(), &refresh).await;
                        this.safe_cache_response(&refresh, &res, false).await;
                    });
                }
            }
            return Ok(res);
        }

        let network = self.network_fetch(req);
        match self.race_timeout(network.clone()).await {
            Some(Ok(res)) => {
                self.safe_cache_response(req, &res, false).await;
                Ok(res)
            }
            _ => {
                tracing::debug!(group = %self.config.name, url = %req.url, "network lost the race, answering 504");
                self.cache_eventually(req, network, false, ctx);
                Ok(Response::gateway_timeout())
            }
        }
    }

    async fn handle_with_freshness(self: &Arc<Self>, req: &Request, ctx: &FetchContext) -> Result<Response, Error> {
        let network = self.network_fetch(req);
        if let Some(Ok(res)) = self.race_timeout(network.clone()).await {
            self.safe_cache_response(req, &res, true).await;
            return Ok(res);
        }

        self.cache_eventually(req, network.clone(), true, ctx);

        // Once the network has failed, any cached copy beats none.
        if let Some((res, _)) = self.load_from_cache(req, false).await? {
            tracing::debug!(group = %self.config.name, url = %req.url, "network unavailable, serving cached copy");
            return Ok(res);
        }

        Ok(network.await.unwrap_or_else(|_| Response::gateway_timeout()))
    }

    fn network_fetch(&self, req: &Request) -> NetworkFetch {
        let fetcher = self.scope.fetcher.clone();
        let req = req.clone();
        async move { fetcher.fetch(&req).await }.boxed().shared()
    }

    /// `None` when the configured timeout elapsed first.
    async fn race_timeout(&self, network: NetworkFetch) -> Option<Result<Response, Error>> {
        match self.config.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), network).await.ok(),
            None => Some(network.await),
        }
    }

    fn cache_eventually(self: &Arc<Self>, req: &Request, network: NetworkFetch, opaque_ok: bool, ctx: &FetchContext) {
        let this = self.clone();
        let req = req.clone();
        ctx.wait_until(async move {
            if let Ok(res) = network.await {
                this.safe_cache_response(&req, &res, opaque_ok).await;
            }
        });
    }

    /// Cached response and its age. With `enforce_max_age`, entries older
    /// than the group's maximum age are evicted instead of returned.
    async fn load_from_cache(&self, req: &Request, enforce_max_age: bool) -> Result<Option<(Response, i64)>, Error> {
        let key = self.cache_key(&req.method, &req.url);
        let Some(res) = self.cache.get(&key).await? else {
            return Ok(None);
        };

        let age = match self.age_table.read_as::<AgeRecord>(&req.url).await {
            Ok(Some(record)) => Some(self.scope.adapter.time() - record.age),
            _ => None,
        };

        let mut lru = self.lru.lock().await;
        match age {
            Some(age) if !enforce_max_age || age <= self.config.max_age as i64 => {
                lru.promote(&req.url);
                Ok(Some((res, age)))
            }
            None if !enforce_max_age => {
                lru.promote(&req.url);
                Ok(Some((res, 0)))
            }
            _ => {
                tracing::debug!(group = %self.config.name, url = %req.url, "evicting expired entry");
                lru.remove(&req.url);
                self.clear_cache_for_url(&req.url).await?;
                self.sync_lru(&lru).await;
                Ok(None)
            }
        }
    }

    async fn safe_cache_response(&self, req: &Request, res: &Response, opaque_ok: bool) {
        if let Err(err) = self.cache_response(req, res, opaque_ok).await {
            // Dynamic data is cached opportunistically; keep serving.
            tracing::warn!(group = %self.config.name, url = %req.url, "failed to cache response: {err}");
            self.scope.debug.log(
                &err,
                &format!("{}.safe_cache_response({}, status: {})", self.label(), req.url, res.status.as_u16()),
            );
        }
    }

    /// Store a response, evicting the least recently used entry first when
    /// the group is full.
    async fn cache_response(&self, req: &Request, res: &Response, opaque_ok: bool) -> Result<(), Error> {
        let cacheable = res.ok() || (opaque_ok && self.config.caches_opaque() && res.is_opaque());
        if !cacheable || self.config.max_size == 0 {
            return Ok(());
        }

        let mut lru = self.lru.lock().await;
        if !lru.contains(&req.url) && lru.len() >= self.config.max_size {
            if let Some(evicted) = lru.evict_tail() {
                tracing::debug!(group = %self.config.name, url = %evicted, "evicted least recently used entry");
                self.clear_cache_for_url(&evicted).await?;
            }
        }

        lru.promote(&req.url);
        self.cache
            .put(&self.cache_key(&req.method, &req.url), res)
            .await?;
        self.age_table
            .write_as(&req.url, &AgeRecord { age: self.scope.adapter.time() })
            .await?;
        self.sync_lru(&lru).await;
        Ok(())
    }

    /// Persist the LRU chain. Failures are logged and otherwise ignored.
    async fn sync_lru(&self, lru: &EvictionList) {
        if let Err(err) = self.lru_table.write_as(LRU_KEY, lru.state()).await {
            tracing::warn!(group = %self.config.name, "failed to persist LRU state: {err}");
            self.scope.debug.log(&err, &format!("{}.sync_lru()", self.label()));
        }
    }

    /// Remove the GET and HEAD entries and the age record of `url`. The LRU
    /// chain is left to the caller.
    async fn clear_cache_for_url(&self, url: &str) -> Result<(), Error> {
        self.cache.delete(&self.cache_key(&Method::GET, url)).await?;
        self.cache.delete(&self.cache_key(&Method::HEAD, url)).await?;
        self.age_table.delete(url).await?;
        Ok(())
    }

    /// Drop every store this group owns.
    pub async fn cleanup(&self) -> Result<(), Error> {
        self.scope.storage.delete(&self.cache_name).await?;
        self.scope.storage.delete(&self.age_name).await?;
        self.scope.storage.delete(&self.lru_name).await?;
        Ok(())
    }

    /// URLs currently tracked, most recently used first.
    pub async fn cached_urls(&self) -> Vec<String> {
        self.lru.lock().await.iter().map(str::to_string).collect()
    }
}
