//! Unified error types for outpost.
//!
//! Variants carry an upper-case code prefix so log lines and tool errors can be
//! grepped by class. Critical errors take the owning app version out of service;
//! unrecoverable-state errors are a subset of critical ones that are also
//! broadcast to affected clients.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the caching agent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// The network primitive itself failed (offline, DNS, connection reset).
    #[error("NETWORK_ERROR: {0}")]
    Network(String),

    /// HTTP error response where a success was required.
    #[error("HTTP_ERROR: {0}")]
    HttpStatus(String),

    /// Storage backend failure on a non-critical path.
    #[error("STORAGE_ERROR: {0}")]
    Storage(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(String),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// JSON (de)serialization of persisted state or manifests failed.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// Manifest document could not be used.
    #[error("INVALID_MANIFEST: {0}")]
    InvalidManifest(String),

    /// Manifest declares a config version this agent does not understand.
    #[error("UNSUPPORTED_CONFIG_VERSION: expected {expected}, got {got}")]
    UnsupportedConfigVersion { expected: u32, got: u32 },

    /// Internal bookkeeping is inconsistent.
    #[error("INVARIANT_VIOLATED: {0}")]
    Invariant(String),

    /// The owning app version can no longer be trusted.
    #[error("CRITICAL: {0}")]
    Critical(String),

    /// Server artifacts no longer match the served manifest.
    #[error("UNRECOVERABLE_STATE: {0}")]
    UnrecoverableState(String),
}

impl Error {
    /// Whether this error must take the owning app version out of service.
    pub fn is_critical(&self) -> bool {
        matches!(self, Error::Critical(_) | Error::UnrecoverableState(_))
    }

    /// Whether affected clients must be told to reload.
    pub fn is_unrecoverable_state(&self) -> bool {
        matches!(self, Error::UnrecoverableState(_))
    }

    /// Message without the code prefix, used in client notifications.
    pub fn reason(&self) -> String {
        match self {
            Error::Critical(msg) | Error::UnrecoverableState(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database("connection closed".to_string()),
            other => Error::Database(format!("{other:?}")),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(format!("{err:?}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::InvalidUrl(msg) => (-32003, msg.clone()),
            Error::Network(msg) => (-32006, msg.clone()),
            Error::HttpStatus(msg) => (-32008, msg.clone()),
            Error::Storage(msg) | Error::Database(msg) | Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::Serialization(msg) => (-32013, msg.clone()),
            Error::InvalidManifest(msg) => (-32014, msg.clone()),
            Error::UnsupportedConfigVersion { .. } => (-32015, err.to_string()),
            Error::Invariant(msg) => (-32603, msg.clone()),
            Error::Critical(msg) => (-32016, msg.clone()),
            Error::UnrecoverableState(msg) => (-32017, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
