//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use crate::host::AgentHost;
use crate::tools::fetch::{FetchParams, fetch_impl};
use crate::tools::lifecycle::{LifecycleParams, lifecycle_impl};
use crate::tools::message::{MessageParams, MessagesParams, message_impl, messages_impl};
use crate::tools::push::{NotificationClickParams, PushParams, notification_click_impl, push_impl};
use crate::tools::state::state_impl;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The MCP server handler fronting one agent.
#[derive(Clone)]
pub struct OutpostServer {
    host: AgentHost,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl OutpostServer {
    pub fn new(host: AgentHost) -> Self {
        Self { host, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Deliver a fetch event. Returns the agent's response, or the network's when the agent declines the request."
    )]
    async fn sw_fetch(&self, params: Parameters<FetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.host, params.0).await
    }

    #[tool(description = "Post a control message (CHECK_FOR_UPDATES, ACTIVATE_UPDATE) from a client to the agent.")]
    async fn sw_message(&self, params: Parameters<MessageParams>) -> Result<CallToolResult, McpError> {
        message_impl(&self.host, params.0).await
    }

    #[tool(description = "Collect the messages the agent has posted to a client, optionally closing the client.")]
    async fn sw_messages(&self, params: Parameters<MessagesParams>) -> Result<CallToolResult, McpError> {
        messages_impl(&self.host, params.0).await
    }

    #[tool(description = "Deliver a push payload. Returns any notifications the agent displayed.")]
    async fn sw_push(&self, params: Parameters<PushParams>) -> Result<CallToolResult, McpError> {
        push_impl(&self.host, params.0).await
    }

    #[tool(description = "Report a click on a displayed notification to every client.")]
    async fn sw_notification_click(
        &self, params: Parameters<NotificationClickParams>,
    ) -> Result<CallToolResult, McpError> {
        notification_click_impl(&self.host, params.0).await
    }

    #[tool(description = "Trigger a lifecycle step: install, activate, check_for_update or cleanup.")]
    async fn sw_lifecycle(&self, params: Parameters<LifecycleParams>) -> Result<CallToolResult, McpError> {
        lifecycle_impl(&self.host, params.0).await
    }

    #[tool(description = "Plain-text diagnostics: driver state, versions with their clients, idle queue and debug log.")]
    async fn sw_state(&self) -> Result<CallToolResult, McpError> {
        state_impl(&self.host).await
    }
}

impl ServerHandler for OutpostServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "outpost-agent".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
