//! Server deployment records

use crate::ids::{ArtifactKey, ServerName, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What has been confirmed running on one server.
///
/// Every key of `deployed_plugins` is a member of `configured_plugins`, and a
/// version only appears here after the instance was restarted into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub name: ServerName,
    pub configured_plugins: BTreeSet<ArtifactKey>,
    pub deployed_runtime: Option<VersionId>,
    pub deployed_plugins: BTreeMap<ArtifactKey, VersionId>,
    pub updated_at: DateTime<Utc>,
}

impl ServerRecord {
    pub fn new(name: ServerName, configured_plugins: BTreeSet<ArtifactKey>) -> Self {
        Self {
            name,
            configured_plugins,
            deployed_runtime: None,
            deployed_plugins: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Replace the configured plugin set, dropping deployed entries for
    /// plugins that are no longer configured. Returns whether anything changed.
    pub fn reconcile_plugins(&mut self, configured: BTreeSet<ArtifactKey>) -> bool {
        if self.configured_plugins == configured {
            return false;
        }
        self.deployed_plugins.retain(|key, _| configured.contains(key));
        self.configured_plugins = configured;
        true
    }

    pub fn deployed_plugin(&self, key: &ArtifactKey) -> Option<&VersionId> {
        self.deployed_plugins.get(key)
    }
}

/// Versions confirmed running after one deploy, applied in a single write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentCommit {
    pub runtime: Option<VersionId>,
    pub plugins: BTreeMap<ArtifactKey, VersionId>,
}

impl DeploymentCommit {
    pub fn is_empty(&self) -> bool {
        self.runtime.is_none() && self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> BTreeSet<ArtifactKey> {
        names.iter().map(|n| ArtifactKey::from(*n)).collect()
    }

    #[test]
    fn test_reconcile_prunes_unconfigured_plugins() {
        let mut record = ServerRecord::new("Lobby".into(), keys(&["Foo", "Bar"]));
        record.deployed_plugins.insert("Foo".into(), "1.0".into());
        record.deployed_plugins.insert("Bar".into(), "2.0".into());

        assert!(record.reconcile_plugins(keys(&["Foo"])));
        assert_eq!(record.deployed_plugins.len(), 1);
        assert!(record.deployed_plugin(&"Bar".into()).is_none());

        assert!(!record.reconcile_plugins(keys(&["Foo"])));
    }
}
