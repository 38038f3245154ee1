//! Version sources
//!
//! Every upstream publishing platform answers the same two questions through
//! [`VersionSource`]: what is the newest version, and what are its bytes.
//! Artifacts declare which platform they come from with a [`SourceSpec`];
//! the [`SourceSet`] picks the matching implementation.

mod github;
mod jenkins;
mod paper;
mod storefront;

pub use github::{GithubSource, DEFAULT_GITHUB_API};
pub use jenkins::JenkinsSource;
pub use paper::{PaperSource, DEFAULT_PAPER_API};
pub use storefront::{BrowserSession, StorefrontListing, StorefrontSource};

use crate::error::SourceError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use updraft_types::{ArtifactRef, VersionId};

/// Upstream platform families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Runtime build host (PaperMC downloads API)
    Paper,
    /// Source-forge release host
    Github,
    /// CI build host
    Jenkins,
    /// Interactive web storefront behind a browser session
    Storefront,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Paper => "paper",
            SourceKind::Github => "github",
            SourceKind::Jenkins => "jenkins",
            SourceKind::Storefront => "storefront",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an artifact is published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceSpec {
    /// Builds of one project version line
    Paper { project: String, version: String },
    /// Latest release of a repository (`owner/name`)
    Github {
        repo: String,
        /// Regex the asset name must fully match; defaults to the first `.jar`
        #[serde(default)]
        asset_pattern: Option<String>,
    },
    /// Last successful build of a job
    Jenkins {
        job_url: String,
        #[serde(default)]
        artifact_pattern: Option<String>,
    },
    /// Resource page on a storefront
    Storefront { resource: String },
}

impl SourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Paper { .. } => SourceKind::Paper,
            SourceSpec::Github { .. } => SourceKind::Github,
            SourceSpec::Jenkins { .. } => SourceKind::Jenkins,
            SourceSpec::Storefront { .. } => SourceKind::Storefront,
        }
    }
}

/// Result of asking a source for its newest version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Update {
        version: VersionId,
        artifact_ref: ArtifactRef,
        changelog_url: Option<String>,
    },
    /// The newest version is the one already approved
    NoUpdate,
}

impl Detection {
    /// `NoUpdate` when `version` is already approved, `Update` otherwise
    pub fn compare(
        version: VersionId,
        artifact_ref: ArtifactRef,
        changelog_url: Option<String>,
        current_approved: Option<&VersionId>,
    ) -> Self {
        if current_approved == Some(&version) {
            Detection::NoUpdate
        } else {
            Detection::Update {
                version,
                artifact_ref,
                changelog_url,
            }
        }
    }
}

/// Raw payload delivered by a source
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    /// SHA-256 the source publishes for this payload, lowercase hex
    pub expected_sha256: Option<String>,
}

/// One upstream publishing platform
#[async_trait]
pub trait VersionSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Ask for the newest version of `target`
    async fn detect(
        &self,
        target: &SourceSpec,
        current_approved: Option<&VersionId>,
    ) -> Result<Detection, SourceError>;

    /// Download the bytes described by `artifact_ref`
    async fn fetch(
        &self,
        target: &SourceSpec,
        artifact_ref: &ArtifactRef,
    ) -> Result<FetchedBytes, SourceError>;
}

/// Source implementations keyed by platform
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: HashMap<SourceKind, Arc<dyn VersionSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source, replacing any previous one of the same kind
    pub fn register(&mut self, source: Arc<dyn VersionSource>) {
        self.sources.insert(source.kind(), source);
    }

    pub fn with(mut self, source: Arc<dyn VersionSource>) -> Self {
        self.register(source);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn VersionSource>> {
        self.sources.get(&kind).cloned()
    }

    /// The source serving `spec`, or `ConfigurationMissing` if none is registered
    pub fn for_spec(&self, spec: &SourceSpec) -> Result<Arc<dyn VersionSource>, SourceError> {
        self.get(spec.kind()).ok_or_else(|| {
            SourceError::ConfigurationMissing(format!("no {} source configured", spec.kind()))
        })
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        self.sources.keys().copied().collect()
    }
}

/// Settings shared by the HTTP-backed sources
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("updraft/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Build the HTTP client used by the sources
pub fn http_client(settings: &HttpSettings) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.timeout)
        .build()
        .map_err(SourceError::from)
}

/// Pick the single published file name that a source should use.
///
/// With a pattern, names must fully match it; without one the first `.jar`
/// wins.
pub(crate) fn pick_file<'a, T>(
    candidates: &'a [T],
    name_of: impl Fn(&T) -> &str,
    pattern: Option<&str>,
) -> Result<&'a T, SourceError> {
    match pattern {
        Some(pattern) => {
            let regex = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| SourceError::InvalidResponse(format!("bad asset pattern: {}", e)))?;
            candidates
                .iter()
                .find(|c| regex.is_match(name_of(*c)))
                .ok_or_else(|| SourceError::NoMatchingAsset(pattern.to_string()))
        }
        None => candidates
            .iter()
            .find(|c| name_of(*c).ends_with(".jar"))
            .ok_or_else(|| SourceError::NoMatchingAsset("*.jar".to_string())),
    }
}

/// GET `url` and return the body, failing on non-success statuses
pub(crate) async fn download(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
) -> Result<Vec<u8>, SourceError> {
    let mut request = client.get(url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_compare() {
        let approved = VersionId::from("2.1");
        let same = Detection::compare("2.1".into(), ArtifactRef::default(), None, Some(&approved));
        assert_eq!(same, Detection::NoUpdate);

        let newer = Detection::compare("2.2".into(), ArtifactRef::default(), None, Some(&approved));
        assert!(matches!(newer, Detection::Update { .. }));
    }

    #[test]
    fn test_pick_file_defaults_to_first_jar() {
        let names = vec!["README.md".to_string(), "Foo-2.1.jar".to_string()];
        let picked = pick_file(&names, |n| n.as_str(), None).unwrap();
        assert_eq!(picked, "Foo-2.1.jar");

        let err = pick_file(&names, |n| n.as_str(), Some(r"Foo-.*-sources\.jar")).unwrap_err();
        assert!(matches!(err, SourceError::NoMatchingAsset(_)));
    }

    #[test]
    fn test_source_spec_deserializes_tagged() {
        let spec: SourceSpec =
            serde_json::from_str(r#"{"type":"github","repo":"acme/foo"}"#).unwrap();
        assert_eq!(spec.kind(), SourceKind::Github);
        assert_eq!(
            spec,
            SourceSpec::Github {
                repo: "acme/foo".into(),
                asset_pattern: None
            }
        );
    }

    #[test]
    fn test_missing_source_is_configuration_missing() {
        let set = SourceSet::new();
        let err = set
            .for_spec(&SourceSpec::Storefront {
                resource: "foo.123".into(),
            })
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::ConfigurationMissing(_)));
    }
}
