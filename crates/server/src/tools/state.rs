//! sw_state tool implementation.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};

use crate::host::AgentHost;

/// Implementation of the sw_state tool: the agent's plain-text diagnostics.
pub async fn state_impl(host: &AgentHost) -> Result<CallToolResult, McpError> {
    let mut report = host.driver.debug_state();
    if host.mailbox.is_unregistered() {
        report.push_str("\nAgent is unregistered.\n");
    }
    Ok(CallToolResult::success(vec![Content::text(report)]))
}
