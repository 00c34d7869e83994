//! Configuration validation rules.

use crate::config::AgentConfig;
use thiserror::Error;
use url::Url;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AgentConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `scope_url` or `manifest_path` is
    /// empty, and `ConfigError::Invalid` if:
    /// - `scope_url` is not an http(s) URL ending in `/`
    /// - `idle_delay_ms` exceeds `max_idle_delay_ms`
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scope_url.is_empty() {
            return Err(ConfigError::Missing {
                field: "scope_url".into(),
                hint: "Set OUTPOST_SCOPE_URL environment variable".into(),
            });
        }
        let scope = Url::parse(&self.scope_url)
            .map_err(|e| ConfigError::Invalid { field: "scope_url".into(), reason: e.to_string() })?;
        if !matches!(scope.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid { field: "scope_url".into(), reason: "must be an http(s) URL".into() });
        }
        if !self.scope_url.ends_with('/') {
            return Err(ConfigError::Invalid { field: "scope_url".into(), reason: "must end with '/'".into() });
        }

        if self.manifest_path.is_empty() {
            return Err(ConfigError::Missing {
                field: "manifest_path".into(),
                hint: "Set OUTPOST_MANIFEST_PATH environment variable".into(),
            });
        }

        if self.idle_delay_ms > self.max_idle_delay_ms {
            return Err(ConfigError::Invalid {
                field: "idle_delay_ms".into(),
                reason: "must not exceed max_idle_delay_ms".into(),
            });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        Ok(())
    }
}
