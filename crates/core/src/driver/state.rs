//! Readiness state and the persisted control record.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::Table;
use crate::manifest::{Manifest, ManifestHash};
use crate::version::AppVersion;

const MANIFESTS_KEY: &str = "manifests";
const ASSIGNMENTS_KEY: &str = "assignments";
const LATEST_KEY: &str = "latest";

/// How much traffic the agent is willing to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadyState {
    /// Serve everyone and accept new clients.
    Normal,
    /// The latest version is broken; only clients pinned to a working
    /// version are served.
    ExistingClientsOnly,
    /// Initialization failed; every request goes to the network.
    SafeMode,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Normal => "NORMAL",
            ReadyState::ExistingClientsOnly => "EXISTING_CLIENTS_ONLY",
            ReadyState::SafeMode => "SAFE_MODE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LatestRecord {
    latest: ManifestHash,
}

/// What survives a restart: every known manifest, client pinnings and the
/// preferred version.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub manifests: BTreeMap<ManifestHash, Manifest>,
    pub assignments: BTreeMap<String, ManifestHash>,
    pub latest: ManifestHash,
}

impl ControlState {
    /// State of a first run: one manifest, no clients.
    pub fn fresh(hash: ManifestHash, manifest: Manifest) -> Self {
        Self { manifests: BTreeMap::from([(hash.clone(), manifest)]), assignments: BTreeMap::new(), latest: hash }
    }

    /// Load the record, failing when any part is missing or the latest
    /// manifest is not among the stored ones.
    pub async fn read(table: &dyn Table) -> Result<Self, Error> {
        let manifests = table
            .read_as::<BTreeMap<ManifestHash, Manifest>>(MANIFESTS_KEY)
            .await?
            .ok_or_else(|| Error::Invariant("no persisted manifests".to_string()))?;
        let assignments = table
            .read_as::<BTreeMap<String, ManifestHash>>(ASSIGNMENTS_KEY)
            .await?
            .ok_or_else(|| Error::Invariant("no persisted assignments".to_string()))?;
        let latest = table
            .read_as::<LatestRecord>(LATEST_KEY)
            .await?
            .ok_or_else(|| Error::Invariant("no persisted latest hash".to_string()))?
            .latest;

        if !manifests.contains_key(&latest) {
            return Err(Error::Invariant(format!("missing manifest for latest hash {latest}")));
        }
        Ok(Self { manifests, assignments, latest })
    }

    /// Write all three keys.
    pub async fn write(&self, table: &dyn Table) -> Result<(), Error> {
        table.write_as(MANIFESTS_KEY, &self.manifests).await?;
        table.write_as(ASSIGNMENTS_KEY, &self.assignments).await?;
        table
            .write_as(LATEST_KEY, &LatestRecord { latest: self.latest.clone() })
            .await
    }
}

/// Mutable driver state. Guarded by a plain mutex and never held across
/// an await.
#[derive(Debug)]
pub(crate) struct DriverState {
    pub readiness: ReadyState,
    pub why: String,
    /// Loaded versions in load order.
    pub versions: Vec<Arc<AppVersion>>,
    pub assignments: BTreeMap<String, ManifestHash>,
    pub latest: Option<ManifestHash>,
    pub last_update_check: Option<i64>,
}

pub(crate) const NOMINAL: &str = "(nominal)";

impl Default for DriverState {
    fn default() -> Self {
        Self {
            readiness: ReadyState::Normal,
            why: NOMINAL.to_string(),
            versions: Vec::new(),
            assignments: BTreeMap::new(),
            latest: None,
            last_update_check: None,
        }
    }
}

impl DriverState {
    pub fn version(&self, hash: &str) -> Option<&Arc<AppVersion>> {
        self.versions.iter().find(|v| v.manifest_hash() == hash)
    }

    /// The version for `hash`, which must be loaded.
    pub fn expect_version(&self, hash: &str, context: &str) -> Result<Arc<AppVersion>, Error> {
        self.version(hash)
            .cloned()
            .ok_or_else(|| Error::Invariant(format!("{context}: want AppVersion for {hash} but not loaded")))
    }

    /// Like [`expect_version`](Self::expect_version), but `None` when the
    /// version failed initialization and must not serve.
    pub fn usable_version(&self, hash: &str, context: &str) -> Result<Option<Arc<AppVersion>>, Error> {
        let version = self.expect_version(hash, context)?;
        Ok(version.okay().then_some(version))
    }

    pub fn latest_hash(&self, context: &str) -> Result<ManifestHash, Error> {
        self.latest
            .clone()
            .ok_or_else(|| Error::Invariant(format!("{context}: latest hash was not set")))
    }

    pub fn latest_version(&self) -> Option<Arc<AppVersion>> {
        self.latest.as_deref().and_then(|h| self.version(h)).cloned()
    }

    /// Clients pinned to `hash`.
    pub fn clients_of(&self, hash: &str) -> Vec<String> {
        self.assignments
            .iter()
            .filter(|(_, h)| h.as_str() == hash)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn set_readiness(&mut self, readiness: ReadyState, why: impl Into<String>) {
        let why = why.into();
        if readiness != self.readiness {
            tracing::info!(from = %self.readiness, to = %readiness, why = %why, "driver state changed");
        }
        self.readiness = readiness;
        self.why = why;
    }

    /// Snapshot for persistence. `None` before initialization has set a
    /// latest version.
    pub fn control(&self) -> Option<ControlState> {
        let latest = self.latest.clone()?;
        Some(ControlState {
            manifests: self
                .versions
                .iter()
                .map(|v| (v.manifest_hash().to_string(), v.manifest().clone()))
                .collect(),
            assignments: self.assignments.clone(),
            latest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStorage, Storage};

    fn manifest() -> Manifest {
        Manifest::from_slice(br#"{"configVersion": 1, "index": "/index.html"}"#).unwrap()
    }

    #[tokio::test]
    async fn test_control_round_trip() {
        let storage = MemoryStorage::new();
        let table = storage.open_table("outpost:/:db:control").await.unwrap();

        let mut state = ControlState::fresh("h1".into(), manifest());
        state.assignments.insert("client".into(), "h1".into());
        state.write(table.as_ref()).await.unwrap();

        assert_eq!(ControlState::read(table.as_ref()).await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_missing_latest_manifest_is_corrupt() {
        let storage = MemoryStorage::new();
        let table = storage.open_table("outpost:/:db:control").await.unwrap();

        let mut state = ControlState::fresh("h1".into(), manifest());
        state.latest = "h2".into();
        state.write(table.as_ref()).await.unwrap();

        assert!(matches!(ControlState::read(table.as_ref()).await, Err(Error::Invariant(_))));
    }

    #[tokio::test]
    async fn test_empty_table_is_corrupt() {
        let storage = MemoryStorage::new();
        let table = storage.open_table("outpost:/:db:control").await.unwrap();
        assert!(ControlState::read(table.as_ref()).await.is_err());
    }

    #[test]
    fn test_ready_state_display() {
        assert_eq!(ReadyState::ExistingClientsOnly.to_string(), "EXISTING_CLIENTS_ONLY");
        assert_eq!(serde_json::to_value(ReadyState::SafeMode).unwrap(), "SAFE_MODE");
    }
}
