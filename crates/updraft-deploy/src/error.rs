//! Error types for deployment

use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to the control-plane API
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Network or transport failure
    #[error("Request failed: {0}")]
    Request(String),

    /// API answered with a non-success status
    #[error("Control plane returned {status} for {url}")]
    Status { status: u16, url: String },

    /// API answered with something we cannot interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A local file to upload could not be read
    #[error("Cannot read {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

impl From<reqwest::Error> for ControlPlaneError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ControlPlaneError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => ControlPlaneError::Request(err.to_string()),
        }
    }
}

/// Occupancy probe failure
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Probe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Probe timed out")]
    Timeout,

    #[error("Invalid status response: {0}")]
    InvalidResponse(String),
}

/// Errors that stop a deploy before anything touched the instance
#[derive(Debug, Error)]
pub enum DeployError {
    /// Control-plane identifiers or credentials are absent
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// A planned upload has no staged file
    #[error("Staged file missing: {}", .0.display())]
    StagedFileMissing(PathBuf),

    /// Approval gate error
    #[error("Approval error: {0}")]
    Approval(#[from] updraft_approval::ApprovalError),

    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] updraft_registry::RegistryError),
}

/// Result type for deploy operations
pub type Result<T> = std::result::Result<T, DeployError>;
