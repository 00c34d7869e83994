//! Manifest document model.
//!
//! The manifest is produced by the build pipeline and delivered as JSON. It is
//! immutable once loaded; its identity is the SHA-1 of its canonical
//! serialization (see [`crate::cache::hash::hash_manifest`]), unknown
//! top-level fields included.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;
use crate::cache::hash::hash_manifest;

/// The only manifest format revision this agent understands.
pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

/// Hash identifying one manifest.
pub type ManifestHash = String;

/// One deployed version's caching configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub config_version: u32,
    pub index: String,
    #[serde(default)]
    pub asset_groups: Vec<AssetGroupConfig>,
    #[serde(default)]
    pub data_groups: Vec<DataGroupConfig>,
    #[serde(default)]
    pub hash_table: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_urls: Option<Vec<NavigationUrl>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_request_strategy: Option<NavigationRequestStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<Value>,
    /// Top-level fields this agent does not interpret, such as the build
    /// timestamp. Kept so they count toward the manifest's identity.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// How an asset group's resources reach the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    Prefetch,
    Lazy,
}

/// Caching strategy of a data group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStrategy {
    Freshness,
    Performance,
}

/// Navigation override strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationRequestStrategy {
    Freshness,
    Performance,
}

/// Cache matching tweaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheQueryOptions {
    /// Match cached entries ignoring the query string.
    #[serde(default)]
    pub ignore_search: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroupConfig {
    pub name: String,
    pub install_mode: InstallMode,
    /// Behaviour on update; defaults to `install_mode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<InstallMode>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_query_options: Option<CacheQueryOptions>,
}

impl AssetGroupConfig {
    pub fn update_mode(&self) -> InstallMode {
        self.update_mode.unwrap_or(self.install_mode)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGroupConfig {
    pub name: String,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub strategy: DataStrategy,
    pub max_size: usize,
    /// Maximum age of a cached entry, in milliseconds.
    pub max_age: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_ahead_ms: Option<u64>,
    /// Bumping the version discards entries cached under the previous one.
    #[serde(default = "default_data_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_opaque_responses: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_query_options: Option<CacheQueryOptions>,
}

fn default_data_version() -> u32 {
    1
}

impl DataGroupConfig {
    /// Opaque responses are only trusted when the group says so, or by default
    /// under the freshness strategy.
    pub fn caches_opaque(&self) -> bool {
        self.cache_opaque_responses
            .unwrap_or(self.strategy == DataStrategy::Freshness)
    }
}

/// One include/exclude rule for navigation requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationUrl {
    pub positive: bool,
    pub regex: String,
}

/// Navigation rules applied when the manifest declares none: every path,
/// except files with an extension and paths containing a `__` segment.
pub fn default_navigation_urls() -> Vec<NavigationUrl> {
    vec![
        NavigationUrl { positive: true, regex: "^/.*$".into() },
        NavigationUrl { positive: false, regex: r"^/.*\.[^/]*$".into() },
        NavigationUrl { positive: false, regex: "^/.*__".into() },
    ]
}

impl Manifest {
    /// Parse a manifest from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidManifest(e.to_string()))
    }

    /// Identity hash of this manifest.
    pub fn hash(&self) -> Result<ManifestHash, Error> {
        hash_manifest(self)
    }

    /// Reject manifests produced for a different agent format.
    pub fn ensure_supported(&self) -> Result<(), Error> {
        if self.config_version != SUPPORTED_CONFIG_VERSION {
            return Err(Error::UnsupportedConfigVersion {
                expected: SUPPORTED_CONFIG_VERSION,
                got: self.config_version,
            });
        }
        Ok(())
    }

    /// Navigation rules in effect for this manifest.
    pub fn effective_navigation_urls(&self) -> Vec<NavigationUrl> {
        self.navigation_urls.clone().unwrap_or_else(default_navigation_urls)
    }
}

/// Compile regex sources from a manifest.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, Error> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| Error::InvalidManifest(format!("bad pattern {p:?}: {e}"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "configVersion": 1,
        "index": "/index.html",
        "assetGroups": [
            {"name": "app", "installMode": "prefetch", "urls": ["/index.html", "/main.js"], "patterns": []},
            {"name": "assets", "installMode": "lazy", "updateMode": "prefetch", "urls": [], "patterns": ["^/img/.*$"]}
        ],
        "dataGroups": [
            {"name": "api", "patterns": ["/api/"], "strategy": "performance", "maxSize": 10, "maxAge": 60000, "timeoutMs": 500}
        ],
        "hashTable": {"/index.html": "aaaa", "/main.js": "bbbb"},
        "appData": {"build": 7}
    }"#;

    #[test]
    fn test_parse_sample() {
        let manifest = Manifest::from_slice(SAMPLE.as_bytes()).unwrap();
        assert_eq!(manifest.config_version, 1);
        assert_eq!(manifest.asset_groups.len(), 2);
        assert_eq!(manifest.asset_groups[0].install_mode, InstallMode::Prefetch);
        assert_eq!(manifest.asset_groups[1].update_mode(), InstallMode::Prefetch);
        assert_eq!(manifest.data_groups[0].strategy, DataStrategy::Performance);
        assert_eq!(manifest.data_groups[0].version, 1);
        assert!(!manifest.data_groups[0].caches_opaque());
        assert_eq!(manifest.hash_table.get("/main.js").map(String::as_str), Some("bbbb"));
    }

    #[test]
    fn test_hash_survives_round_trip() {
        let manifest = Manifest::from_slice(SAMPLE.as_bytes()).unwrap();
        let stored = serde_json::to_value(&manifest).unwrap();
        let restored: Manifest = serde_json::from_value(stored).unwrap();
        assert_eq!(manifest.hash().unwrap(), restored.hash().unwrap());
    }

    #[test]
    fn test_unknown_fields_count_toward_identity() {
        let first = Manifest::from_slice(br#"{"configVersion": 1, "index": "/index.html", "timestamp": 1}"#).unwrap();
        let second = Manifest::from_slice(br#"{"configVersion": 1, "index": "/index.html", "timestamp": 2}"#).unwrap();
        assert_eq!(first.extra.get("timestamp"), Some(&Value::from(1)));
        assert_ne!(first.hash().unwrap(), second.hash().unwrap());

        let restored: Manifest = serde_json::from_value(serde_json::to_value(&first).unwrap()).unwrap();
        assert_eq!(restored, first);
        assert_eq!(restored.hash().unwrap(), first.hash().unwrap());
    }

    #[test]
    fn test_unsupported_config_version() {
        let mut manifest = Manifest::from_slice(SAMPLE.as_bytes()).unwrap();
        assert!(manifest.ensure_supported().is_ok());
        manifest.config_version = 2;
        assert!(matches!(
            manifest.ensure_supported(),
            Err(Error::UnsupportedConfigVersion { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn test_default_navigation_urls() {
        let manifest = Manifest::from_slice(SAMPLE.as_bytes()).unwrap();
        let rules = manifest.effective_navigation_urls();
        assert_eq!(rules.len(), 3);
        let exclude: Vec<_> = rules.iter().filter(|r| !r.positive).collect();
        let ext = Regex::new(&exclude[0].regex).unwrap();
        assert!(ext.is_match("/main.js"));
        assert!(!ext.is_match("/dashboard/settings"));
        let underscore = Regex::new(&exclude[1].regex).unwrap();
        assert!(underscore.is_match("/__admin"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = compile_patterns(&["(unclosed".to_string()]);
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }

    #[test]
    fn test_missing_index_rejected() {
        let result = Manifest::from_slice(br#"{"configVersion": 1}"#);
        assert!(matches!(result, Err(Error::InvalidManifest(_))));
    }
}
