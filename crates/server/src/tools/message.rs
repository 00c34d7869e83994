//! sw_message and sw_messages tool implementations.
//!
//! Clients post control messages to the agent and collect whatever the
//! agent has posted back to them.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use outpost_core::{InboundMessage, OutboundMessage};

use crate::error::HostError;
use crate::host::AgentHost;
use crate::tools::json_result;

/// Parameters for the sw_message tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageParams {
    /// Id of the posting client. Unknown ids are connected.
    pub client_id: String,

    /// The message, e.g. `{"action": "CHECK_FOR_UPDATES", "statusNonce": 1}`.
    pub message: Value,

    /// Block until the agent has handled the message.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageOutput {
    pub accepted: bool,
}

/// Implementation of the sw_message tool.
pub async fn message_impl(host: &AgentHost, params: MessageParams) -> Result<CallToolResult, McpError> {
    if params.client_id.is_empty() {
        return Err(HostError::InvalidInput("client_id cannot be empty".into()).into());
    }
    let message: InboundMessage =
        serde_json::from_value(params.message.clone()).map_err(|_| HostError::InvalidMessage(params.message.to_string()))?;

    host.mailbox.connect(&params.client_id);
    let background = host.driver.on_message(message, Some(params.client_id));
    let accepted = !background.is_empty();
    host.settle(background, params.wait).await;

    json_result(&MessageOutput { accepted })
}

/// Parameters for the sw_messages tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessagesParams {
    pub client_id: String,

    /// Close the client after collecting its messages.
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesOutput {
    pub messages: Vec<OutboundMessage>,
}

/// Implementation of the sw_messages tool.
pub async fn messages_impl(host: &AgentHost, params: MessagesParams) -> Result<CallToolResult, McpError> {
    let messages = host.mailbox.drain(&params.client_id);
    if params.close {
        host.mailbox.disconnect(&params.client_id);
    }
    json_result(&MessagesOutput { messages })
}
