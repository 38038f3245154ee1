//! Error types for sources, archives and the fetcher

use thiserror::Error;
use updraft_types::{ArtifactId, VersionId};

/// Failure talking to an upstream version source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network or transport failure
    #[error("Request failed: {0}")]
    Http(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned {status} for {url}")]
    Status { status: u16, url: String },

    /// Upstream answered with something we cannot interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No published file matched the configured pattern
    #[error("No matching asset: {0}")]
    NoMatchingAsset(String),

    /// Required credentials or collaborators are absent
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SourceError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => SourceError::Http(err.to_string()),
        }
    }
}

/// Archive entry resolution failure
#[derive(Debug, Error)]
pub enum SelectorError {
    /// No file entry matched
    #[error("No archive entry matches {selector}")]
    NoMatch { selector: String },

    /// More than one file entry matched
    #[error("Archive selector {selector} is ambiguous: {}", matches.join(", "))]
    Ambiguous {
        selector: String,
        matches: Vec<String>,
    },

    /// Pattern is not a valid regular expression
    #[error("Invalid selector pattern: {0}")]
    InvalidPattern(String),

    /// Payload is not a readable archive
    #[error("Unreadable archive: {0}")]
    Archive(String),
}

/// Fetcher error type
#[derive(Debug, Error)]
pub enum FetchError {
    /// Source could not deliver the bytes
    #[error("Source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    /// Downloaded bytes do not match the published digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Archive entry resolution failed
    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    /// Requested version is not the approved one
    #[error("{artifact} version {version} is not approved")]
    NotApproved {
        artifact: ArtifactId,
        version: VersionId,
    },

    /// Required credentials or collaborators are absent
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] updraft_registry::RegistryError),

    /// Staging directory I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether this failure means the item should be skipped rather than counted as failed
    pub fn is_configuration_missing(&self) -> bool {
        matches!(
            self,
            FetchError::ConfigurationMissing(_)
                | FetchError::SourceUnavailable(SourceError::ConfigurationMissing(_))
        )
    }
}

/// Result type for fetch operations
pub type Result<T> = std::result::Result<T, FetchError>;
