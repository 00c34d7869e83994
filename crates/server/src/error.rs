//! Structured errors for tool input the agent never sees.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Invalid input parameters (e.g., unknown request mode).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A message payload that is not one of the known actions.
    #[error("INVALID_MESSAGE: {0}")]
    InvalidMessage(String),
}

impl From<HostError> for McpError {
    fn from(err: HostError) -> Self {
        let (code, message) = match &err {
            HostError::InvalidInput(msg) => (-32602, msg.clone()),
            HostError::InvalidMessage(msg) => (-32602, format!("unsupported message: {msg}")),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_maps_to_invalid_params() {
        let err: McpError = HostError::InvalidMessage("SELF_DESTRUCT".into()).into();
        assert_eq!(err.code, ErrorCode(-32602));
        assert!(err.message.contains("SELF_DESTRUCT"));
    }
}
