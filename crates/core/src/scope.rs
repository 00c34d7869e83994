//! Collaborators shared by every version and group of one agent.

use std::sync::Arc;
use std::time::Duration;

use crate::adapter::Adapter;
use crate::cache::Storage;
use crate::debug::DebugLog;
use crate::idle::IdleScheduler;
use crate::net::Fetcher;

#[derive(Clone)]
pub struct Scope {
    pub adapter: Adapter,
    pub storage: Arc<dyn Storage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub idle: Arc<IdleScheduler>,
    pub debug: Arc<DebugLog>,
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("adapter", &self.adapter).finish_non_exhaustive()
    }
}

impl Scope {
    /// Wire up a scope with a fresh debug log and idle queue.
    pub fn new(
        adapter: Adapter,
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn Fetcher>,
        idle_delay: Duration,
        max_idle_delay: Duration,
    ) -> Self {
        let debug = Arc::new(DebugLog::new(adapter.clock()));
        let idle = Arc::new(IdleScheduler::new(adapter.clock(), idle_delay, max_idle_delay, debug.clone()));
        Self { adapter, storage, fetcher, idle, debug }
    }

    /// Name of a key/value table under this agent's prefix.
    pub fn table_name(&self, table: &str) -> String {
        crate::cache::table_name(self.adapter.cache_name_prefix(), table)
    }

    /// Name of a response cache under this agent's prefix.
    pub fn cache_name(&self, cache: &str) -> String {
        format!("{}:{cache}", self.adapter.cache_name_prefix())
    }
}
