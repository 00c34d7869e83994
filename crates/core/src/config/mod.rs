//! Agent configuration with layered loading.
//!
//! Sources, highest precedence first:
//!
//! 1. Environment variables (OUTPOST_*)
//! 2. TOML config file (if OUTPOST_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Agent configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Registration scope. The origin and every store name derive from it.
    ///
    /// Set via OUTPOST_SCOPE_URL environment variable.
    #[serde(default = "default_scope_url")]
    pub scope_url: String,

    /// Manifest location, relative to the scope.
    ///
    /// Set via OUTPOST_MANIFEST_PATH environment variable.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Path to the SQLite database holding every cache and table.
    ///
    /// Set via OUTPOST_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Quiet period before idle tasks run, in milliseconds.
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,

    /// Longest a queued idle task may wait, in milliseconds.
    #[serde(default = "default_max_idle_delay_ms")]
    pub max_idle_delay_ms: u64,

    /// User-Agent string for network requests.
    ///
    /// Set via OUTPOST_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Network request timeout in milliseconds.
    ///
    /// Set via OUTPOST_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_scope_url() -> String {
    "http://localhost:8080/".into()
}

fn default_manifest_path() -> String {
    "outpost.json".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./outpost-agent.sqlite")
}

fn default_idle_delay_ms() -> u64 {
    crate::idle::IDLE_DELAY.as_millis() as u64
}

fn default_max_idle_delay_ms() -> u64 {
    crate::idle::MAX_IDLE_DELAY.as_millis() as u64
}

fn default_user_agent() -> String {
    "outpost/0.1".into()
}

fn default_timeout_ms() -> u64 {
    20_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scope_url: default_scope_url(),
            manifest_path: default_manifest_path(),
            db_path: default_db_path(),
            idle_delay_ms: default_idle_delay_ms(),
            max_idle_delay_ms: default_max_idle_delay_ms(),
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl AgentConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn max_idle_delay(&self) -> Duration {
        Duration::from_millis(self.max_idle_delay_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("OUTPOST_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("OUTPOST_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.scope_url, "http://localhost:8080/");
        assert_eq!(config.manifest_path, "outpost.json");
        assert_eq!(config.db_path, PathBuf::from("./outpost-agent.sqlite"));
        assert_eq!(config.idle_delay_ms, 5_000);
        assert_eq!(config.max_idle_delay_ms, 30_000);
        assert_eq!(config.user_agent, "outpost/0.1");
        assert_eq!(config.timeout_ms, 20_000);
    }

    #[test]
    fn test_durations() {
        let config = AgentConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(20_000));
        assert_eq!(config.idle_delay(), crate::idle::IDLE_DELAY);
        assert_eq!(config.max_idle_delay(), crate::idle::MAX_IDLE_DELAY);
    }

    #[test]
    fn test_toml_layer() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("outpost.toml", "scope_url = \"https://app.example.com/shop/\"\ntimeout_ms = 500\n")?;
            jail.set_env("OUTPOST_CONFIG_FILE", "outpost.toml");
            jail.set_env("OUTPOST_TIMEOUT_MS", "750");

            let config = AgentConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.scope_url, "https://app.example.com/shop/");
            assert_eq!(config.timeout_ms, 750);
            Ok(())
        });
    }
}
