//! sw_lifecycle tool implementation.
//!
//! Install, activation and the periodic chores a browser would trigger on
//! its own schedule.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::host::AgentHost;
use crate::tools::json_result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Install,
    Activate,
    CheckForUpdate,
    /// Drop versions no client uses any more.
    Cleanup,
}

/// Parameters for the sw_lifecycle tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LifecycleParams {
    pub event: LifecycleEvent,

    #[serde(default)]
    pub wait: bool,
}

/// Output from the sw_lifecycle tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LifecycleOutput {
    pub event: LifecycleEvent,
    /// For check_for_update: whether a new version was installed.
    pub updated: Option<bool>,
    pub readiness: String,
    pub latest_hash: Option<String>,
    pub unregistered: bool,
}

/// Implementation of the sw_lifecycle tool.
pub async fn lifecycle_impl(host: &AgentHost, params: LifecycleParams) -> Result<CallToolResult, McpError> {
    let mut updated = None;
    match params.event {
        LifecycleEvent::Install => host.driver.on_install(),
        LifecycleEvent::Activate => host.settle(host.driver.on_activate(), params.wait).await,
        LifecycleEvent::CheckForUpdate => {
            host.driver.ensure_initialized().await?;
            updated = Some(host.driver.check_for_update().await);
        }
        LifecycleEvent::Cleanup => {
            host.driver.ensure_initialized().await?;
            host.driver.cleanup_caches().await?;
        }
    }

    json_result(&LifecycleOutput {
        event: params.event,
        updated,
        readiness: host.driver.readiness().to_string(),
        latest_hash: host.driver.latest_hash(),
        unregistered: host.mailbox.is_unregistered(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{host, output};

    #[tokio::test(start_paused = true)]
    async fn test_activate_initializes() {
        let (host, _) = host();
        let params = LifecycleParams { event: LifecycleEvent::Activate, wait: true };
        let out = output(&lifecycle_impl(&host, params).await.unwrap());
        assert_eq!(out["readiness"], "NORMAL");
        assert!(out["latest_hash"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_for_update_without_changes() {
        let (host, _) = host();
        let params = LifecycleParams { event: LifecycleEvent::CheckForUpdate, wait: false };
        let out = output(&lifecycle_impl(&host, params).await.unwrap());
        assert_eq!(out["updated"], false);
        assert_eq!(out["unregistered"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_keeps_latest() {
        let (host, _) = host();
        let params = LifecycleParams { event: LifecycleEvent::Cleanup, wait: false };
        let out = output(&lifecycle_impl(&host, params).await.unwrap());
        assert_eq!(host.driver.version_hashes().len(), 1);
        assert_eq!(out["event"], "cleanup");
    }
}
