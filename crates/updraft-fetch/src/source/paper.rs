//! PaperMC downloads API (v2)

use super::{download, Detection, FetchedBytes, SourceKind, SourceSpec, VersionSource};
use crate::error::SourceError;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use updraft_types::{ArtifactRef, VersionId};

/// Public PaperMC API root
pub const DEFAULT_PAPER_API: &str = "https://api.papermc.io/v2";

#[derive(Debug, Deserialize)]
struct VersionBuilds {
    builds: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct BuildInfo {
    downloads: BuildDownloads,
}

#[derive(Debug, Deserialize)]
struct BuildDownloads {
    application: Download,
}

#[derive(Debug, Deserialize)]
struct Download {
    name: String,
    sha256: String,
}

/// Runtime builds published through the PaperMC downloads API
pub struct PaperSource {
    client: reqwest::Client,
    base_url: String,
}

impl PaperSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn download_url(&self, project: &str, version: &str, build: &str, file: &str) -> String {
        format!(
            "{}/projects/{}/versions/{}/builds/{}/downloads/{}",
            self.base_url, project, version, build, file
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))
    }
}

fn expect_paper(target: &SourceSpec) -> Result<(&str, &str), SourceError> {
    match target {
        SourceSpec::Paper { project, version } => Ok((project.as_str(), version.as_str())),
        other => Err(SourceError::ConfigurationMissing(format!(
            "paper source cannot serve a {} target",
            other.kind()
        ))),
    }
}

#[async_trait]
impl VersionSource for PaperSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Paper
    }

    async fn detect(
        &self,
        target: &SourceSpec,
        current_approved: Option<&VersionId>,
    ) -> Result<Detection, SourceError> {
        let (project, version) = expect_paper(target)?;

        let url = format!("{}/projects/{}/versions/{}", self.base_url, project, version);
        let builds: VersionBuilds = self.get_json(&url).await?;
        let build = builds
            .builds
            .iter()
            .max()
            .copied()
            .ok_or_else(|| SourceError::InvalidResponse(format!("no builds for {}", version)))?;

        let url = format!("{}/builds/{}", url, build);
        let info: BuildInfo = self.get_json(&url).await?;
        let download = info.downloads.application;

        debug!(project, version, build, "Latest build resolved");

        let build = build.to_string();
        let artifact_ref = ArtifactRef::default()
            .with_url(self.download_url(project, version, &build, &download.name))
            .with_build(build.clone())
            .with_filename(download.name)
            .with_checksum(download.sha256.to_ascii_lowercase());

        Ok(Detection::compare(
            VersionId::new(format!("{}-build{}", version, build)),
            artifact_ref,
            Some(format!("https://papermc.io/downloads/{}", project)),
            current_approved,
        ))
    }

    async fn fetch(
        &self,
        target: &SourceSpec,
        artifact_ref: &ArtifactRef,
    ) -> Result<FetchedBytes, SourceError> {
        let (project, version) = expect_paper(target)?;

        let url = match (&artifact_ref.url, &artifact_ref.build, &artifact_ref.filename) {
            (Some(url), _, _) => url.clone(),
            (None, Some(build), Some(file)) => self.download_url(project, version, build, file),
            _ => {
                return Err(SourceError::InvalidResponse(
                    "artifact ref carries neither url nor build and file".to_string(),
                ))
            }
        };

        let bytes = download(&self.client, &url, None).await?;
        Ok(FetchedBytes {
            bytes,
            expected_sha256: artifact_ref.checksum.clone(),
        })
    }
}
