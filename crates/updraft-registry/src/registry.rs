//! Version registry - the single writer of artifact and server records

use crate::error::{RegistryError, Result};
use crate::store::{InMemoryStore, RegistryStore};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};
use updraft_types::{
    ArtifactId, ArtifactKey, ArtifactKind, ArtifactRecord, ArtifactRef, DeploymentCommit,
    LatestChange, ServerName, ServerRecord, VersionId,
};

/// Applies mutation intents to artifact and server records.
///
/// Each intent is a read-modify-write against the store, serialized by a lock
/// scoped to the one artifact or server it touches.
pub struct VersionRegistry {
    store: Arc<dyn RegistryStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VersionRegistry {
    /// Create a registry over the given store
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Create a registry backed by an in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    async fn lock(&self, scope: String) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(scope)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    async fn lock_artifact(&self, id: &ArtifactId) -> OwnedMutexGuard<()> {
        self.lock(format!("artifact:{}", id)).await
    }

    async fn lock_server(&self, name: &ServerName) -> OwnedMutexGuard<()> {
        self.lock(format!("server:{}", name)).await
    }

    // ═══════════════════════════════════════════════════════════════════
    // ARTIFACTS
    // ═══════════════════════════════════════════════════════════════════

    /// Snapshot of one artifact record
    pub async fn get(&self, id: &ArtifactId) -> Result<Option<ArtifactRecord>> {
        Ok(self.store.load_artifact(id).await?)
    }

    /// Snapshot of all artifact records, optionally of one kind
    pub async fn list(&self, kind: Option<ArtifactKind>) -> Result<Vec<ArtifactRecord>> {
        let records = self.store.list_artifacts().await?;
        Ok(match kind {
            Some(kind) => records.into_iter().filter(|r| r.id.kind == kind).collect(),
            None => records,
        })
    }

    /// Record the version a source currently reports as newest.
    ///
    /// Creates the record on first detection. Reporting the version already
    /// recorded as latest is a no-op.
    #[instrument(skip(self, artifact_ref), fields(artifact = %id, version = %version))]
    pub async fn upsert_latest(
        &self,
        id: &ArtifactId,
        version: VersionId,
        artifact_ref: ArtifactRef,
    ) -> Result<(ArtifactRecord, LatestChange)> {
        let _guard = self.lock_artifact(id).await;

        let (mut record, change) = match self.store.load_artifact(id).await? {
            Some(record) if record.latest.as_ref() == Some(&version) => {
                return Ok((record, LatestChange::Unchanged));
            }
            Some(record) => {
                let previous = record.latest.clone();
                (record, LatestChange::Changed { previous })
            }
            None => (ArtifactRecord::new(id.clone()), LatestChange::Created),
        };

        record.latest = Some(version);
        record.latest_ref = Some(artifact_ref);
        record.updated_at = Utc::now();
        self.store.save_artifact(&record).await?;

        info!(change = ?change, "Latest version recorded");
        Ok((record, change))
    }

    /// Promote `version` to approved, provided it is still the latest.
    ///
    /// Fails with [`RegistryError::StaleApproval`] when a newer version was
    /// detected while the decision was pending; the record is left untouched.
    #[instrument(skip(self, artifact_ref), fields(artifact = %id, version = %version))]
    pub async fn approve(
        &self,
        id: &ArtifactId,
        version: &VersionId,
        artifact_ref: ArtifactRef,
    ) -> Result<ArtifactRecord> {
        let _guard = self.lock_artifact(id).await;

        let mut record = self
            .store
            .load_artifact(id)
            .await?
            .ok_or_else(|| RegistryError::artifact_not_found(id))?;

        if record.latest.as_ref() != Some(version) {
            return Err(RegistryError::StaleApproval {
                artifact: id.clone(),
                requested: version.clone(),
                latest: record.latest,
            });
        }

        if record.approved.as_ref() == Some(version) {
            debug!("Version already approved");
            return Ok(record);
        }

        record.approved = Some(version.clone());
        record.approved_ref = Some(artifact_ref);
        record.updated_at = Utc::now();
        self.store.save_artifact(&record).await?;

        info!("Version approved");
        Ok(record)
    }

    /// Record that the bytes of the approved `version` are verified on disk
    #[instrument(skip(self), fields(artifact = %id, version = %version))]
    pub async fn mark_fetched(&self, id: &ArtifactId, version: &VersionId) -> Result<ArtifactRecord> {
        let _guard = self.lock_artifact(id).await;

        let mut record = self
            .store
            .load_artifact(id)
            .await?
            .ok_or_else(|| RegistryError::artifact_not_found(id))?;

        if record.approved.as_ref() != Some(version) {
            return Err(RegistryError::NotApproved {
                artifact: id.clone(),
                version: version.clone(),
                approved: record.approved,
            });
        }

        if record.fetched.as_ref() == Some(version) {
            return Ok(record);
        }

        record.fetched = Some(version.clone());
        record.updated_at = Utc::now();
        self.store.save_artifact(&record).await?;

        info!("Artifact marked fetched");
        Ok(record)
    }

    // ═══════════════════════════════════════════════════════════════════
    // SERVERS
    // ═══════════════════════════════════════════════════════════════════

    /// Create the server record if missing, or reconcile its configured
    /// plugin set with the current configuration
    #[instrument(skip(self, configured), fields(server = %name))]
    pub async fn ensure_server(
        &self,
        name: &ServerName,
        configured: BTreeSet<ArtifactKey>,
    ) -> Result<ServerRecord> {
        let _guard = self.lock_server(name).await;

        match self.store.load_server(name).await? {
            Some(mut record) => {
                if record.reconcile_plugins(configured) {
                    record.updated_at = Utc::now();
                    self.store.save_server(&record).await?;
                    info!("Server plugin set reconciled");
                }
                Ok(record)
            }
            None => {
                let record = ServerRecord::new(name.clone(), configured);
                self.store.save_server(&record).await?;
                info!("Server registered");
                Ok(record)
            }
        }
    }

    /// Snapshot of one server record
    pub async fn get_server(&self, name: &ServerName) -> Result<Option<ServerRecord>> {
        Ok(self.store.load_server(name).await?)
    }

    /// Snapshot of all server records
    pub async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        Ok(self.store.list_servers().await?)
    }

    /// Record a single version as running on `server`
    pub async fn mark_deployed(
        &self,
        server: &ServerName,
        kind: ArtifactKind,
        key: &ArtifactKey,
        version: VersionId,
    ) -> Result<ServerRecord> {
        let mut commit = DeploymentCommit::default();
        match kind {
            ArtifactKind::Runtime => commit.runtime = Some(version),
            ArtifactKind::Plugin => {
                commit.plugins.insert(key.clone(), version);
            }
        }
        self.commit_deployment(server, &commit).await
    }

    /// Apply every version confirmed by one deploy in a single write.
    ///
    /// Nothing is applied if the commit names a plugin the server does not carry.
    #[instrument(skip(self, commit), fields(server = %server))]
    pub async fn commit_deployment(
        &self,
        server: &ServerName,
        commit: &DeploymentCommit,
    ) -> Result<ServerRecord> {
        let _guard = self.lock_server(server).await;

        let mut record = self
            .store
            .load_server(server)
            .await?
            .ok_or_else(|| RegistryError::server_not_found(server))?;

        if let Some(plugin) = commit
            .plugins
            .keys()
            .find(|key| !record.configured_plugins.contains(*key))
        {
            return Err(RegistryError::UnknownPlugin {
                server: server.clone(),
                plugin: plugin.clone(),
            });
        }

        if commit.is_empty() {
            return Ok(record);
        }

        if let Some(runtime) = &commit.runtime {
            record.deployed_runtime = Some(runtime.clone());
        }
        for (key, version) in &commit.plugins {
            record.deployed_plugins.insert(key.clone(), version.clone());
        }
        record.updated_at = Utc::now();
        self.store.save_server(&record).await?;

        info!(
            runtime = ?commit.runtime,
            plugins = commit.plugins.len(),
            "Deployment committed"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn keys(names: &[&str]) -> BTreeSet<ArtifactKey> {
        names.iter().map(|n| ArtifactKey::from(*n)).collect()
    }

    async fn seeded(latest: &str, approved: Option<&str>) -> (VersionRegistry, ArtifactId) {
        let registry = VersionRegistry::in_memory();
        let id = ArtifactId::runtime("paper-1.20");
        if let Some(approved) = approved {
            registry
                .upsert_latest(&id, approved.into(), ArtifactRef::default())
                .await
                .unwrap();
            registry
                .approve(&id, &approved.into(), ArtifactRef::default())
                .await
                .unwrap();
        }
        registry
            .upsert_latest(&id, latest.into(), ArtifactRef::default().with_build("5"))
            .await
            .unwrap();
        (registry, id)
    }

    #[tokio::test]
    async fn test_upsert_reports_change_kind() {
        let registry = VersionRegistry::in_memory();
        let id = ArtifactId::plugin("Foo");

        let (_, change) = registry
            .upsert_latest(&id, "2.0".into(), ArtifactRef::default())
            .await
            .unwrap();
        assert_eq!(change, LatestChange::Created);

        let (_, change) = registry
            .upsert_latest(&id, "2.0".into(), ArtifactRef::default())
            .await
            .unwrap();
        assert_eq!(change, LatestChange::Unchanged);

        let (record, change) = registry
            .upsert_latest(&id, "2.1".into(), ArtifactRef::default())
            .await
            .unwrap();
        assert_eq!(
            change,
            LatestChange::Changed {
                previous: Some("2.0".into())
            }
        );
        assert_eq!(record.latest, Some("2.1".into()));
    }

    #[tokio::test]
    async fn test_unchanged_latest_keeps_pending_approval() {
        let (registry, id) = seeded("1.20-build5", Some("1.20-build4")).await;

        let (record, change) = registry
            .upsert_latest(&id, "1.20-build5".into(), ArtifactRef::default())
            .await
            .unwrap();
        assert!(!change.is_new());
        assert!(record.awaiting_approval());
        assert_eq!(record.approved, Some("1.20-build4".into()));
    }

    #[tokio::test]
    async fn test_stale_approval_leaves_record_unchanged() {
        let (registry, id) = seeded("1.20-build5", Some("1.20-build4")).await;
        let before = registry.get(&id).await.unwrap().unwrap();

        let err = registry
            .approve(&id, &"1.20-build3".into(), ArtifactRef::default())
            .await
            .unwrap_err();
        assert!(err.is_stale());

        let after = registry.get(&id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_approve_latest_copies_ref() {
        let (registry, id) = seeded("1.20-build5", None).await;

        let record = registry
            .approve(&id, &"1.20-build5".into(), ArtifactRef::default().with_build("5"))
            .await
            .unwrap();
        assert_eq!(record.approved, Some("1.20-build5".into()));
        assert_eq!(record.approved_ref.as_ref().unwrap().build.as_deref(), Some("5"));
        assert!(record.needs_fetch());
    }

    #[tokio::test]
    async fn test_approve_unknown_artifact_is_not_found() {
        let registry = VersionRegistry::in_memory();
        let err = registry
            .approve(&ArtifactId::plugin("Ghost"), &"1.0".into(), ArtifactRef::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_fetched_requires_approved_version() {
        let (registry, id) = seeded("1.20-build5", Some("1.20-build4")).await;

        let err = registry
            .mark_fetched(&id, &"1.20-build5".into())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotApproved { .. }));
        assert_eq!(registry.get(&id).await.unwrap().unwrap().fetched, None);

        let record = registry
            .mark_fetched(&id, &"1.20-build4".into())
            .await
            .unwrap();
        assert_eq!(record.fetched, record.approved);
    }

    #[tokio::test]
    async fn test_ensure_server_reconciles_plugins() {
        let registry = VersionRegistry::in_memory();
        let lobby = ServerName::from("Lobby");

        registry
            .ensure_server(&lobby, keys(&["Foo", "Bar"]))
            .await
            .unwrap();
        registry
            .mark_deployed(&lobby, ArtifactKind::Plugin, &"Bar".into(), "3.0".into())
            .await
            .unwrap();

        let record = registry.ensure_server(&lobby, keys(&["Foo"])).await.unwrap();
        assert!(record.deployed_plugins.is_empty());
        assert_eq!(registry.list_servers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_rejects_unconfigured_plugin() {
        let registry = VersionRegistry::in_memory();
        let lobby = ServerName::from("Lobby");
        registry.ensure_server(&lobby, keys(&["Foo"])).await.unwrap();

        let mut commit = DeploymentCommit {
            runtime: Some("1.20-build5".into()),
            ..Default::default()
        };
        commit.plugins.insert("Foo".into(), "2.1".into());
        commit.plugins.insert("Bar".into(), "3.0".into());

        let err = registry.commit_deployment(&lobby, &commit).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownPlugin { .. }));

        let record = registry.get_server(&lobby).await.unwrap().unwrap();
        assert_eq!(record.deployed_runtime, None);
        assert!(record.deployed_plugins.is_empty());
    }

    #[tokio::test]
    async fn test_commit_applies_runtime_and_plugins_together() {
        let registry = VersionRegistry::in_memory();
        let lobby = ServerName::from("Lobby");
        registry
            .ensure_server(&lobby, keys(&["Foo", "Bar"]))
            .await
            .unwrap();

        let mut commit = DeploymentCommit {
            runtime: Some("1.20-build5".into()),
            ..Default::default()
        };
        commit.plugins.insert("Foo".into(), "2.1".into());

        let record = registry.commit_deployment(&lobby, &commit).await.unwrap();
        assert_eq!(record.deployed_runtime, Some("1.20-build5".into()));
        assert_eq!(record.deployed_plugin(&"Foo".into()), Some(&"2.1".into()));
        assert_eq!(record.deployed_plugin(&"Bar".into()), None);
    }

    #[tokio::test]
    async fn test_concurrent_server_writes_are_not_lost() {
        let registry = Arc::new(VersionRegistry::in_memory());
        let lobby = ServerName::from("Lobby");
        let plugins: Vec<String> = (0..32).map(|i| format!("plugin-{i}")).collect();
        registry
            .ensure_server(
                &lobby,
                plugins.iter().map(|p| ArtifactKey::from(p.as_str())).collect(),
            )
            .await
            .unwrap();

        let mut handles = Vec::new();
        for plugin in plugins.clone() {
            let registry = registry.clone();
            let lobby = lobby.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .mark_deployed(&lobby, ArtifactKind::Plugin, &plugin.into(), "1.0".into())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = registry.get_server(&lobby).await.unwrap().unwrap();
        assert_eq!(record.deployed_plugins.len(), plugins.len());
    }

    #[tokio::test]
    async fn test_registry_over_sqlite() {
        let store = SqliteStore::in_memory().await.unwrap();
        let registry = VersionRegistry::new(Arc::new(store));
        let id = ArtifactId::plugin("Foo");

        registry
            .upsert_latest(&id, "2.1".into(), ArtifactRef::default())
            .await
            .unwrap();
        registry
            .approve(&id, &"2.1".into(), ArtifactRef::default())
            .await
            .unwrap();
        registry.mark_fetched(&id, &"2.1".into()).await.unwrap();

        let listed = registry.list(Some(ArtifactKind::Plugin)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fetched, Some("2.1".into()));
        assert!(registry
            .list(Some(ArtifactKind::Runtime))
            .await
            .unwrap()
            .is_empty());
    }
}
