//! GitHub releases

use super::{download, pick_file, Detection, FetchedBytes, SourceKind, SourceSpec, VersionSource};
use crate::error::SourceError;
use async_trait::async_trait;
use serde::Deserialize;
use updraft_types::{ArtifactRef, VersionId};

/// Public GitHub REST API root
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
    /// `sha256:<hex>` when GitHub has computed one
    #[serde(default)]
    digest: Option<String>,
}

/// Plugins published as release assets
pub struct GithubSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GithubSource {
    pub fn new(client: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }
}

fn sha256_of(digest: &str) -> Option<String> {
    digest
        .strip_prefix("sha256:")
        .map(|hex| hex.to_ascii_lowercase())
}

#[async_trait]
impl VersionSource for GithubSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Github
    }

    async fn detect(
        &self,
        target: &SourceSpec,
        current_approved: Option<&VersionId>,
    ) -> Result<Detection, SourceError> {
        let SourceSpec::Github {
            repo,
            asset_pattern,
        } = target
        else {
            return Err(SourceError::ConfigurationMissing(format!(
                "github source cannot serve a {} target",
                target.kind()
            )));
        };

        let url = format!("{}/repos/{}/releases/latest", self.base_url, repo);
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let release: Release = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;

        let asset = pick_file(&release.assets, |a| a.name.as_str(), asset_pattern.as_deref())?;

        let mut artifact_ref = ArtifactRef::default()
            .with_filename(asset.name.clone())
            .with_url(asset.browser_download_url.clone());
        artifact_ref.checksum = asset.digest.as_deref().and_then(sha256_of);

        let changelog = release
            .html_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}/releases/tag/{}", repo, release.tag_name));

        Ok(Detection::compare(
            VersionId::new(release.tag_name),
            artifact_ref,
            Some(changelog),
            current_approved,
        ))
    }

    async fn fetch(
        &self,
        _target: &SourceSpec,
        artifact_ref: &ArtifactRef,
    ) -> Result<FetchedBytes, SourceError> {
        let url = artifact_ref.url.as_deref().ok_or_else(|| {
            SourceError::InvalidResponse("release asset has no download url".to_string())
        })?;

        let bytes = download(&self.client, url, self.token.as_deref()).await?;
        Ok(FetchedBytes {
            bytes,
            expected_sha256: artifact_ref.checksum.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(pattern: Option<&str>) -> SourceSpec {
        SourceSpec::Github {
            repo: "acme/foo".into(),
            asset_pattern: pattern.map(str::to_string),
        }
    }

    async fn mock_release(server: &MockServer) {
        let body = serde_json::json!({
            "tag_name": "v2.1",
            "html_url": "https://github.com/acme/foo/releases/tag/v2.1",
            "assets": [
                {
                    "name": "Foo-2.1-sources.jar",
                    "browser_download_url": format!("{}/dl/sources.jar", server.uri())
                },
                {
                    "name": "Foo-2.1.jar",
                    "browser_download_url": format!("{}/dl/foo.jar", server.uri()),
                    "digest": "sha256:DEADBEEF"
                }
            ]
        });
        Mock::given(method("GET"))
            .and(path("/repos/acme/foo/releases/latest"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_detect_picks_asset_by_pattern() {
        let server = MockServer::start().await;
        mock_release(&server).await;
        let source = GithubSource::new(
            reqwest::Client::new(),
            &server.uri(),
            Some("secret".into()),
        );

        let detection = source
            .detect(&target(Some(r"Foo-[\d.]+\.jar")), None)
            .await
            .unwrap();
        let Detection::Update {
            version,
            artifact_ref,
            changelog_url,
        } = detection
        else {
            panic!("expected an update");
        };
        assert_eq!(version.as_str(), "v2.1");
        assert_eq!(artifact_ref.filename.as_deref(), Some("Foo-2.1.jar"));
        assert_eq!(artifact_ref.checksum.as_deref(), Some("deadbeef"));
        assert_eq!(
            changelog_url.as_deref(),
            Some("https://github.com/acme/foo/releases/tag/v2.1")
        );
    }

    #[tokio::test]
    async fn test_detect_without_pattern_takes_first_jar() {
        let server = MockServer::start().await;
        mock_release(&server).await;
        let source = GithubSource::new(
            reqwest::Client::new(),
            &server.uri(),
            Some("secret".into()),
        );

        let detection = source.detect(&target(None), None).await.unwrap();
        let Detection::Update { artifact_ref, .. } = detection else {
            panic!("expected an update");
        };
        assert_eq!(artifact_ref.filename.as_deref(), Some("Foo-2.1-sources.jar"));
        assert!(artifact_ref.checksum.is_none());
    }

    #[tokio::test]
    async fn test_fetch_downloads_asset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dl/foo.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"foo".to_vec()))
            .mount(&server)
            .await;
        let source = GithubSource::new(reqwest::Client::new(), &server.uri(), None);

        let artifact_ref = ArtifactRef::default().with_url(format!("{}/dl/foo.jar", server.uri()));
        let fetched = source.fetch(&target(None), &artifact_ref).await.unwrap();
        assert_eq!(fetched.bytes, b"foo");
        assert!(fetched.expected_sha256.is_none());
    }
}
