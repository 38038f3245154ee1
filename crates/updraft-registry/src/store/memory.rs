//! In-memory storage implementation

use super::traits::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use updraft_types::{ArtifactId, ArtifactRecord, ServerName, ServerRecord};

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStore {
    artifacts: Arc<RwLock<HashMap<ArtifactId, ArtifactRecord>>>,
    servers: Arc<RwLock<HashMap<ServerName, ServerRecord>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryStore {
    async fn load_artifact(&self, id: &ArtifactId) -> StoreResult<Option<ArtifactRecord>> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts.get(id).cloned())
    }

    async fn save_artifact(&self, record: &ArtifactRecord) -> StoreResult<()> {
        let mut artifacts = self.artifacts.write().await;
        artifacts.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn list_artifacts(&self) -> StoreResult<Vec<ArtifactRecord>> {
        let artifacts = self.artifacts.read().await;
        let mut records: Vec<_> = artifacts.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[async_trait]
impl ServerStore for InMemoryStore {
    async fn load_server(&self, name: &ServerName) -> StoreResult<Option<ServerRecord>> {
        let servers = self.servers.read().await;
        Ok(servers.get(name).cloned())
    }

    async fn save_server(&self, record: &ServerRecord) -> StoreResult<()> {
        let mut servers = self.servers.write().await;
        servers.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn list_servers(&self) -> StoreResult<Vec<ServerRecord>> {
        let servers = self.servers.read().await;
        let mut records: Vec<_> = servers.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

impl RegistryStore for InMemoryStore {}
