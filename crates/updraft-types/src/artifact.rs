//! Artifact records and locators

use crate::ids::{ArtifactId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque locator for an artifact's bytes, as handed out by a version source.
///
/// The core never interprets these fields; they are stored next to the
/// version they describe and handed back to the same source on fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Build identifier on the upstream host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,

    /// Upstream file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Expected SHA-256 of the downloaded payload, lowercase hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Direct download location, when the source knows it at detect time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ArtifactRef {
    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Persisted staged state of one artifact.
///
/// Stages advance `latest` → `approved` → `fetched`. `approved` only ever
/// takes a value that equalled `latest` when it was approved, and `fetched`
/// only ever takes a value that equalled `approved` when the bytes were
/// verified. Records are created on first detection and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: ArtifactId,
    pub latest: Option<VersionId>,
    pub latest_ref: Option<ArtifactRef>,
    pub approved: Option<VersionId>,
    pub approved_ref: Option<ArtifactRef>,
    pub fetched: Option<VersionId>,
    pub updated_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// A record with nothing detected yet
    pub fn new(id: ArtifactId) -> Self {
        Self {
            id,
            latest: None,
            latest_ref: None,
            approved: None,
            approved_ref: None,
            fetched: None,
            updated_at: Utc::now(),
        }
    }

    /// The detected version has not been promoted yet
    pub fn awaiting_approval(&self) -> bool {
        self.latest.is_some() && self.latest != self.approved
    }

    /// An approved version still has to be downloaded and verified
    pub fn needs_fetch(&self) -> bool {
        self.approved.is_some() && self.approved != self.fetched
    }
}

/// Effect of recording a newly reported latest version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestChange {
    /// First detection of this artifact
    Created,
    /// Latest moved away from a previously recorded version
    Changed { previous: Option<VersionId> },
    /// Source reported the version already recorded as latest
    Unchanged,
}

impl LatestChange {
    pub fn is_new(&self) -> bool {
        !matches!(self, LatestChange::Unchanged)
    }
}
