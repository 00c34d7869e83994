//! Wiring of one agent instance and the host side it talks to.

use std::sync::Arc;

use outpost_client::{FetchClient, FetchConfig};
use outpost_core::{Adapter, AgentConfig, Background, Driver, Error, Fetcher, Scope, SqliteStorage, SystemClock};

use crate::mailbox::Mailbox;

#[derive(Clone)]
pub struct AgentHost {
    pub driver: Driver,
    pub mailbox: Arc<Mailbox>,
    /// Network used for requests the agent declines.
    pub fetcher: Arc<dyn Fetcher>,
}

impl AgentHost {
    /// Open the SQLite store and network client named by `config`.
    pub async fn open(config: &AgentConfig) -> Result<Self, Error> {
        let storage = SqliteStorage::open(&config.db_path).await?;
        let fetcher = Arc::new(FetchClient::new(FetchConfig::from_agent(config)?)?);
        let adapter = Adapter::new(&config.scope_url, Arc::new(SystemClock))?;
        let scope = Scope::new(adapter, Arc::new(storage), fetcher, config.idle_delay(), config.max_idle_delay());
        Ok(Self::new(scope, &config.manifest_path))
    }

    pub fn new(scope: Scope, manifest_path: &str) -> Self {
        let mailbox = Arc::new(Mailbox::default());
        let fetcher = scope.fetcher.clone();
        let driver = Driver::new(scope, mailbox.clone(), manifest_path);
        Self { driver, mailbox, fetcher }
    }

    /// Drive work that outlives an event, either inline or detached.
    pub async fn settle(&self, background: Background, wait: bool) {
        if background.is_empty() {
            return;
        }
        if wait {
            background.wait().await;
        } else {
            background.spawn();
        }
    }
}
