//! Error types for updraft-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use updraft_approval::{ApprovalError, ChannelError};
use updraft_registry::{RegistryError, StorageError};

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Registry error during startup
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Upstream source setup error
    #[error("Source error: {0}")]
    Source(#[from] updraft_fetch::SourceError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Cycle name not recognised
    #[error("Unknown cycle: {0}")]
    UnknownCycle(String),

    /// Artifact is not part of the configured catalog
    #[error("Artifact not configured: {0}")]
    NotConfigured(String),

    /// Artifact has no unapproved latest version
    #[error("Nothing awaiting approval for {0}")]
    NothingPending(String),

    /// Upstream source error
    #[error("Source error: {0}")]
    Source(#[from] updraft_fetch::SourceError),

    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Approval error
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::UnknownCycle(_) => ApiError::BadRequest(err.to_string()),
            SchedulerError::NotConfigured(_) => ApiError::NotFound(err.to_string()),
            SchedulerError::NothingPending(_) => ApiError::Conflict(err.to_string()),
            SchedulerError::Registry(e) => ApiError::Registry(e),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ChannelError> for ApiError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::UnknownMessage(id) => ApiError::NotFound(format!("Prompt {} not found", id)),
            ChannelError::Unavailable(reason) => ApiError::Conflict(reason),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Registry(RegistryError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Registry(RegistryError::StaleApproval { .. }) => {
                (StatusCode::CONFLICT, "STALE_APPROVAL")
            }
            ApiError::Registry(RegistryError::NotApproved { .. })
            | ApiError::Registry(RegistryError::UnknownPlugin { .. }) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            ApiError::Registry(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use updraft_types::{ArtifactId, VersionId};

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("test".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SchedulerError::NothingPending("plugin/Foo".to_string()))
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_stale_approval_is_conflict() {
        let err = ApiError::Registry(RegistryError::StaleApproval {
            artifact: ArtifactId::plugin("Foo"),
            requested: VersionId::from("2.0"),
            latest: Some(VersionId::from("2.1")),
        });
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
