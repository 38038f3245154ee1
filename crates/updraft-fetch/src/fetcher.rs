//! Artifact fetcher - download, verify, unpack, stage, record

use crate::archive::{extract_single, ArchiveSpec};
use crate::error::{FetchError, Result};
use crate::source::{SourceSet, SourceSpec};
use crate::staging::StagingArea;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use updraft_registry::{RegistryError, VersionRegistry};
use updraft_types::{
    ArtifactId, ArtifactRef, EventSource, UpdaterEvent, UpdaterEventEnvelope, VersionId,
};

/// Everything needed to fetch one configured artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTarget {
    pub id: ArtifactId,
    pub source: SourceSpec,
    /// File name the artifact is staged and uploaded under
    pub staged_filename: String,
    /// Set when the payload is an archive containing the artifact
    pub archive: Option<ArchiveSpec>,
}

/// A verified artifact sitting in the staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub id: ArtifactId,
    pub version: VersionId,
    pub path: PathBuf,
    /// Whether this call downloaded anything
    pub downloaded: bool,
}

/// Downloads approved versions and advances `fetched` once the bytes check out
pub struct ArtifactFetcher {
    registry: Arc<VersionRegistry>,
    sources: SourceSet,
    staging: StagingArea,
    enforce_checksums: bool,
    event_tx: Option<broadcast::Sender<UpdaterEventEnvelope>>,
}

impl ArtifactFetcher {
    pub fn new(registry: Arc<VersionRegistry>, sources: SourceSet, staging: StagingArea) -> Self {
        Self {
            registry,
            sources,
            staging,
            enforce_checksums: true,
            event_tx: None,
        }
    }

    /// Accept payloads whose digest differs from the published one (logged only)
    pub fn with_checksum_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_checksums = enforce;
        self
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<UpdaterEventEnvelope>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Path `version` of a target is staged at
    pub fn staged_path(&self, target: &ArtifactTarget, version: &VersionId) -> PathBuf {
        self.staging
            .path_for(&target.id, version, &target.staged_filename)
    }

    /// Fetch whatever is currently approved for `target`, if it is not fetched yet
    pub async fn fetch_approved(&self, target: &ArtifactTarget) -> Result<Option<FetchedArtifact>> {
        let Some(record) = self.registry.get(&target.id).await? else {
            return Ok(None);
        };
        if !record.needs_fetch() {
            return Ok(None);
        }
        let (Some(version), Some(artifact_ref)) = (record.approved, record.approved_ref) else {
            return Ok(None);
        };
        self.fetch(target, &version, &artifact_ref).await.map(Some)
    }

    /// Download, verify and stage `version` of `target`.
    ///
    /// Returns immediately when `version` is already fetched. Nothing is
    /// recorded unless every step succeeds.
    #[instrument(skip(self, target, artifact_ref), fields(artifact = %target.id, version = %version))]
    pub async fn fetch(
        &self,
        target: &ArtifactTarget,
        version: &VersionId,
        artifact_ref: &ArtifactRef,
    ) -> Result<FetchedArtifact> {
        let result = self.fetch_inner(target, version, artifact_ref).await;

        match &result {
            Ok(fetched) if fetched.downloaded => {
                self.emit_event(UpdaterEvent::ArtifactFetched {
                    artifact: target.id.clone(),
                    version: version.clone(),
                });
            }
            Ok(_) => {}
            Err(e) if e.is_configuration_missing() => {}
            Err(e) => {
                self.emit_event(UpdaterEvent::FetchFailed {
                    artifact: target.id.clone(),
                    version: version.clone(),
                    reason: e.to_string(),
                });
            }
        }

        result
    }

    async fn fetch_inner(
        &self,
        target: &ArtifactTarget,
        version: &VersionId,
        artifact_ref: &ArtifactRef,
    ) -> Result<FetchedArtifact> {
        // 1. Check current state
        let record = self
            .registry
            .get(&target.id)
            .await?
            .ok_or_else(|| FetchError::NotApproved {
                artifact: target.id.clone(),
                version: version.clone(),
            })?;

        if record.fetched.as_ref() == Some(version) {
            debug!("Already fetched");
            return Ok(FetchedArtifact {
                id: target.id.clone(),
                version: version.clone(),
                path: self.staged_path(target, version),
                downloaded: false,
            });
        }

        if record.approved.as_ref() != Some(version) {
            return Err(FetchError::NotApproved {
                artifact: target.id.clone(),
                version: version.clone(),
            });
        }

        // 2. Download
        let source = self.sources.for_spec(&target.source)?;
        let payload = source.fetch(&target.source, artifact_ref).await?;

        // 3. Verify digest of the downloaded payload
        let actual = hex::encode(Sha256::digest(&payload.bytes));
        if let Some(expected) = payload
            .expected_sha256
            .as_deref()
            .or(artifact_ref.checksum.as_deref())
        {
            let expected = expected.to_ascii_lowercase();
            if expected != actual {
                if self.enforce_checksums {
                    warn!(expected = %expected, actual = %actual, "Checksum mismatch, discarding download");
                    return Err(FetchError::ChecksumMismatch { expected, actual });
                }
                warn!(expected = %expected, actual = %actual, "Checksum mismatch ignored");
            }
        }

        // 4. Unpack
        let bytes = match &target.archive {
            Some(spec) => extract_single(&payload.bytes, spec)?,
            None => payload.bytes,
        };

        // 5. Stage next to any version a deploy may still be reading
        let path = self
            .staging
            .install(&target.id, version, &target.staged_filename, bytes)
            .await?;

        // 6. Record; an approval that moved on mid-download leaves nothing behind
        if let Err(e) = self.registry.mark_fetched(&target.id, version).await {
            if let Err(io) = self.staging.discard(&target.id, version).await {
                warn!(error = %io, "Could not discard unrecorded download");
            }
            return Err(match e {
                RegistryError::NotApproved { .. } => FetchError::NotApproved {
                    artifact: target.id.clone(),
                    version: version.clone(),
                },
                other => other.into(),
            });
        }

        // 7. Keep this version and the one it replaces
        let mut keep = vec![version];
        keep.extend(record.fetched.as_ref());
        if let Err(e) = self.staging.retain(&target.id, &keep).await {
            warn!(error = %e, "Could not prune old staged versions");
        }

        info!(path = %path.display(), sha256 = %actual, "Artifact fetched");
        Ok(FetchedArtifact {
            id: target.id.clone(),
            version: version.clone(),
            path,
            downloaded: true,
        })
    }

    fn emit_event(&self, event: UpdaterEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(UpdaterEventEnvelope::new(event, EventSource::Fetcher));
        }
    }
}
