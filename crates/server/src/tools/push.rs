//! sw_push and sw_notification_click tool implementations.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::AgentHost;
use crate::mailbox::ShownNotification;
use crate::tools::json_result;

/// Parameters for the sw_push tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PushParams {
    /// Decoded push payload. A `notification` object with a `title` is shown.
    pub data: Value,

    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushOutput {
    /// Notifications displayed so far and not yet reported.
    pub notifications: Vec<ShownNotification>,
}

/// Implementation of the sw_push tool.
pub async fn push_impl(host: &AgentHost, params: PushParams) -> Result<CallToolResult, McpError> {
    host.settle(host.driver.on_push(params.data), params.wait).await;
    json_result(&PushOutput { notifications: host.mailbox.take_notifications() })
}

/// Parameters for the sw_notification_click tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationClickParams {
    /// The clicked notification as displayed.
    pub notification: Value,

    /// Action button that was clicked; empty for the notification body.
    #[serde(default)]
    pub action: String,

    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationClickOutput {
    pub delivered: bool,
}

/// Implementation of the sw_notification_click tool.
pub async fn notification_click_impl(
    host: &AgentHost, params: NotificationClickParams,
) -> Result<CallToolResult, McpError> {
    let background = host
        .driver
        .on_notification_click(params.notification, params.action);
    host.settle(background, params.wait).await;
    json_result(&NotificationClickOutput { delivered: true })
}
