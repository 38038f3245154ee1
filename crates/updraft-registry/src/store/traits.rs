//! Storage trait definitions

use crate::error::StorageError;
use async_trait::async_trait;
use updraft_types::{ArtifactId, ArtifactRecord, ServerName, ServerRecord};

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StorageError>;

/// Combined storage trait
#[async_trait]
pub trait RegistryStore: ArtifactStore + ServerStore + Send + Sync {}

/// Storage for artifact records
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Get an artifact record by identity
    async fn load_artifact(&self, id: &ArtifactId) -> StoreResult<Option<ArtifactRecord>>;

    /// Create or replace an artifact record
    async fn save_artifact(&self, record: &ArtifactRecord) -> StoreResult<()>;

    /// List all artifact records
    async fn list_artifacts(&self) -> StoreResult<Vec<ArtifactRecord>>;
}

/// Storage for server records
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Get a server record by name
    async fn load_server(&self, name: &ServerName) -> StoreResult<Option<ServerRecord>>;

    /// Create or replace a server record
    async fn save_server(&self, record: &ServerRecord) -> StoreResult<()>;

    /// List all server records
    async fn list_servers(&self) -> StoreResult<Vec<ServerRecord>>;
}
