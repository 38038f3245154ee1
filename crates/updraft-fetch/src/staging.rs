//! On-disk staging directory for verified artifacts

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use updraft_types::{ArtifactId, VersionId};

/// Staged files live at `<root>/<kind>/<key>/<version>/<filename>`.
///
/// A staged version is never rewritten once recorded, so a deploy planned
/// against one version keeps reading that version's bytes while newer ones
/// are fetched next to it.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(id.kind.as_str()).join(id.key.as_str())
    }

    /// Where `version` of `id` is staged
    pub fn path_for(&self, id: &ArtifactId, version: &VersionId, filename: &str) -> PathBuf {
        self.artifact_dir(id).join(version_dir(version)).join(filename)
    }

    /// Write `bytes` as the staged file of `version`.
    ///
    /// The bytes are written to a temporary file in the destination directory
    /// and renamed into place, so readers see either nothing or the whole file.
    pub async fn install(
        &self,
        id: &ArtifactId,
        version: &VersionId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> std::io::Result<PathBuf> {
        let dest = self.path_for(id, version, filename);
        let target = dest.clone();

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let dir = target
                .parent()
                .ok_or_else(|| std::io::Error::other("staged path has no parent"))?;
            std::fs::create_dir_all(dir)?;

            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(dest)
    }

    /// Whether `version` of `id` is staged
    pub async fn exists(&self, id: &ArtifactId, version: &VersionId, filename: &str) -> bool {
        tokio::fs::try_exists(self.path_for(id, version, filename))
            .await
            .unwrap_or(false)
    }

    /// Drop the staged copy of `version`
    pub async fn discard(&self, id: &ArtifactId, version: &VersionId) -> std::io::Result<()> {
        let dir = self.artifact_dir(id).join(version_dir(version));
        match tokio::fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Remove every staged version of `id` not listed in `keep`
    pub async fn retain(&self, id: &ArtifactId, keep: &[&VersionId]) -> std::io::Result<()> {
        let dir = self.artifact_dir(id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let kept = keep
                .iter()
                .any(|v| name.to_str() == Some(version_dir(v).as_str()));
            if !kept && entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            }
        }
        Ok(())
    }
}

/// Directory name for a version; upstream tags may carry path separators
fn version_dir(version: &VersionId) -> String {
    let name: String = version
        .as_str()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | '+' => c,
            _ => '_',
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        format!("_{}", name)
    } else {
        name
    }
}
