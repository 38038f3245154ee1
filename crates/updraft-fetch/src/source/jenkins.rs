//! Jenkins last-successful-build artifacts

use super::{download, pick_file, Detection, FetchedBytes, SourceKind, SourceSpec, VersionSource};
use crate::error::SourceError;
use async_trait::async_trait;
use serde::Deserialize;
use updraft_types::{ArtifactRef, VersionId};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Build {
    number: u64,
    url: String,
    #[serde(default)]
    artifacts: Vec<BuildArtifact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildArtifact {
    file_name: String,
    relative_path: String,
}

/// Plugins built by a CI job
pub struct JenkinsSource {
    client: reqwest::Client,
}

impl JenkinsSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VersionSource for JenkinsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Jenkins
    }

    async fn detect(
        &self,
        target: &SourceSpec,
        current_approved: Option<&VersionId>,
    ) -> Result<Detection, SourceError> {
        let SourceSpec::Jenkins {
            job_url,
            artifact_pattern,
        } = target
        else {
            return Err(SourceError::ConfigurationMissing(format!(
                "jenkins source cannot serve a {} target",
                target.kind()
            )));
        };

        let url = format!(
            "{}/lastSuccessfulBuild/api/json",
            job_url.trim_end_matches('/')
        );
        let build: Build = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        let artifact = pick_file(
            &build.artifacts,
            |a| a.file_name.as_str(),
            artifact_pattern.as_deref(),
        )?;

        let build_url = build.url.trim_end_matches('/');
        let artifact_ref = ArtifactRef::default()
            .with_build(build.number.to_string())
            .with_filename(artifact.file_name.clone())
            .with_url(format!("{}/artifact/{}", build_url, artifact.relative_path));

        Ok(Detection::compare(
            VersionId::new(format!("build{}", build.number)),
            artifact_ref,
            Some(format!("{}/changes", build_url)),
            current_approved,
        ))
    }

    async fn fetch(
        &self,
        _target: &SourceSpec,
        artifact_ref: &ArtifactRef,
    ) -> Result<FetchedBytes, SourceError> {
        let url = artifact_ref.url.as_deref().ok_or_else(|| {
            SourceError::InvalidResponse("build artifact has no download url".to_string())
        })?;

        Ok(FetchedBytes {
            bytes: download(&self.client, url, None).await?,
            expected_sha256: None,
        })
    }
}
