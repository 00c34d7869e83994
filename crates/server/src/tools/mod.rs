//! MCP tool implementations.
//!
//! Each tool delivers one host event to the agent: a fetch, a client
//! message, a push, a notification click or a lifecycle step.

pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod push;
pub mod state;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use outpost_core::Error;

/// Serialize a tool output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::Serialization(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}
