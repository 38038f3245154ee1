//! Storefront resources reachable only through an interactive browser

use super::{Detection, FetchedBytes, SourceKind, SourceSpec, VersionSource};
use crate::error::SourceError;
use async_trait::async_trait;
use std::sync::Arc;
use updraft_types::{ArtifactRef, VersionId};

/// What a storefront resource page advertises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorefrontListing {
    pub version: String,
    pub download_url: Option<String>,
    pub filename: Option<String>,
}

/// Headless browser collaborator.
///
/// Implementations own login, session cookies and anti-bot challenges.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Read the current listing of `resource`
    async fn listing(&self, resource: &str) -> Result<StorefrontListing, SourceError>;

    /// Download the file behind a listing
    async fn download(
        &self,
        resource: &str,
        artifact_ref: &ArtifactRef,
    ) -> Result<Vec<u8>, SourceError>;
}

/// Storefront source delegating all page work to a [`BrowserSession`]
pub struct StorefrontSource {
    session: Arc<dyn BrowserSession>,
}

impl StorefrontSource {
    pub fn new(session: Arc<dyn BrowserSession>) -> Self {
        Self { session }
    }
}

fn resource_of(target: &SourceSpec) -> Result<&str, SourceError> {
    match target {
        SourceSpec::Storefront { resource } => Ok(resource.as_str()),
        other => Err(SourceError::ConfigurationMissing(format!(
            "storefront source cannot serve a {} target",
            other.kind()
        ))),
    }
}

#[async_trait]
impl VersionSource for StorefrontSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Storefront
    }

    async fn detect(
        &self,
        target: &SourceSpec,
        current_approved: Option<&VersionId>,
    ) -> Result<Detection, SourceError> {
        let resource = resource_of(target)?;
        let listing = self.session.listing(resource).await?;

        let mut artifact_ref = ArtifactRef::default();
        artifact_ref.url = listing.download_url;
        artifact_ref.filename = listing.filename;

        Ok(Detection::compare(
            VersionId::new(listing.version),
            artifact_ref,
            None,
            current_approved,
        ))
    }

    async fn fetch(
        &self,
        target: &SourceSpec,
        artifact_ref: &ArtifactRef,
    ) -> Result<FetchedBytes, SourceError> {
        let resource = resource_of(target)?;
        Ok(FetchedBytes {
            bytes: self.session.download(resource, artifact_ref).await?,
            expected_sha256: None,
        })
    }
}
