//! Scope-aware URL handling and the injected clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use url::Url;

use crate::Error;

/// Root of every store name this agent creates.
pub const STORE_ROOT: &str = "outpost:";

/// Wall-clock source in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self { now: AtomicI64::new(start_ms) }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Adapts the engine to its registration scope.
#[derive(Clone)]
pub struct Adapter {
    scope: Url,
    origin: String,
    cache_name_prefix: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("scope", &self.scope.as_str())
            .field("cache_name_prefix", &self.cache_name_prefix)
            .finish()
    }
}

impl Adapter {
    pub fn new(scope_url: &str, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let scope = Url::parse(scope_url).map_err(|e| Error::InvalidUrl(format!("{scope_url}: {e}")))?;
        let origin = scope.origin().ascii_serialization();
        // Scoping the prefix by path keeps agents on the same origin apart.
        let cache_name_prefix = format!("{STORE_ROOT}{}", scope.path());
        Ok(Self { scope, origin, cache_name_prefix, clock })
    }

    pub fn scope_url(&self) -> &str {
        self.scope.as_str()
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Prefix shared by every cache and table this agent owns.
    pub fn cache_name_prefix(&self) -> &str {
        &self.cache_name_prefix
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Current time in epoch milliseconds.
    pub fn time(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Whether the scope points at a local development server.
    pub fn is_localhost(&self) -> bool {
        self.scope.host_str() == Some("localhost")
    }

    /// Parse `url`, resolving it against the scope when relative.
    pub fn parse_url(&self, url: &str) -> Result<Url, Error> {
        self.scope
            .join(url)
            .map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))
    }

    /// Absolute form of `url`.
    pub fn resolve(&self, url: &str) -> String {
        self.parse_url(url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| url.to_string())
    }

    /// Representation used by manifests: the path for same-origin URLs,
    /// the full URL otherwise.
    pub fn normalize_url(&self, url: &str) -> String {
        match self.parse_url(url) {
            Ok(parsed) if parsed.origin().ascii_serialization() == self.origin => parsed.path().to_string(),
            _ => url.to_string(),
        }
    }

    /// Scope-relative path of a well-known agent resource.
    pub fn scoped_path(&self, relative: &str) -> String {
        self.parse_url(relative)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| relative.to_string())
    }
}
