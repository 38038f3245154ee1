//! Error types for the version registry

use updraft_types::{ArtifactId, ArtifactKey, ServerName, VersionId};
use thiserror::Error;

/// Registry error type
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Approval targets a version that is no longer the latest
    #[error("Stale approval for {artifact}: requested {requested}, latest is {}", display_opt(.latest))]
    StaleApproval {
        artifact: ArtifactId,
        requested: VersionId,
        latest: Option<VersionId>,
    },

    /// Fetch completion for a version that is not the approved one
    #[error("{artifact} version {version} is not approved (approved: {})", display_opt(.approved))]
    NotApproved {
        artifact: ArtifactId,
        version: VersionId,
        approved: Option<VersionId>,
    },

    /// Deploy commit names a plugin the server does not carry
    #[error("Plugin {plugin} is not configured for server {server}")]
    UnknownPlugin {
        server: ServerName,
        plugin: ArtifactKey,
    },

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

fn display_opt(value: &Option<VersionId>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl RegistryError {
    /// Create a not found error for an artifact
    pub fn artifact_not_found(id: &ArtifactId) -> Self {
        Self::NotFound(format!("Artifact {}", id))
    }

    /// Create a not found error for a server
    pub fn server_not_found(name: &ServerName) -> Self {
        Self::NotFound(format!("Server {}", name))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, RegistryError::StaleApproval { .. })
    }
}
