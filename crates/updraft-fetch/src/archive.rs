//! Resolving a single file inside an archive payload

use crate::error::SelectorError;
use flate2::read::GzDecoder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};

/// Container formats a payload may arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

/// Which entry of the archive is the artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySelector {
    /// Exact internal path
    Path(String),
    /// Regex the full internal path must match
    Pattern(String),
}

impl fmt::Display for EntrySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySelector::Path(p) => write!(f, "path {}", p),
            EntrySelector::Pattern(p) => write!(f, "pattern {}", p),
        }
    }
}

/// How to unpack an archive-sourced artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub format: ArchiveFormat,
    pub selector: EntrySelector,
}

enum Matcher {
    Exact(String),
    Regex(Regex),
}

impl Matcher {
    fn new(selector: &EntrySelector) -> Result<Self, SelectorError> {
        match selector {
            EntrySelector::Path(path) => Ok(Matcher::Exact(normalize(path).to_string())),
            EntrySelector::Pattern(pattern) => Regex::new(&format!("^(?:{})$", pattern))
                .map(Matcher::Regex)
                .map_err(|e| SelectorError::InvalidPattern(e.to_string())),
        }
    }

    fn matches(&self, name: &str) -> bool {
        let name = normalize(name);
        match self {
            Matcher::Exact(path) => name == path,
            Matcher::Regex(regex) => regex.is_match(name),
        }
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches("./").trim_start_matches('/')
}

/// Return the contents of the one file entry `spec` selects.
///
/// Directory entries never match. Zero or several matches fail without
/// returning any bytes.
pub fn extract_single(payload: &[u8], spec: &ArchiveSpec) -> Result<Vec<u8>, SelectorError> {
    let matcher = Matcher::new(&spec.selector)?;
    let mut matched = match spec.format {
        ArchiveFormat::Zip => zip_matches(payload, &matcher)?,
        ArchiveFormat::TarGz => tar_gz_matches(payload, &matcher)?,
    };

    match matched.len() {
        0 => Err(SelectorError::NoMatch {
            selector: spec.selector.to_string(),
        }),
        1 => Ok(matched.remove(0).1),
        _ => Err(SelectorError::Ambiguous {
            selector: spec.selector.to_string(),
            matches: matched.into_iter().map(|(name, _)| name).collect(),
        }),
    }
}

fn archive_error(err: impl fmt::Display) -> SelectorError {
    SelectorError::Archive(err.to_string())
}

fn zip_matches(payload: &[u8], matcher: &Matcher) -> Result<Vec<(String, Vec<u8>)>, SelectorError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(payload)).map_err(archive_error)?;
    let mut matched = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(archive_error)?;
        if entry.is_dir() || !matcher.matches(entry.name()) {
            continue;
        }
        let name = entry.name().to_string();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).map_err(archive_error)?;
        matched.push((name, contents));
    }

    Ok(matched)
}

fn tar_gz_matches(
    payload: &[u8],
    matcher: &Matcher,
) -> Result<Vec<(String, Vec<u8>)>, SelectorError> {
    let mut archive = tar::Archive::new(GzDecoder::new(payload));
    let mut matched = Vec::new();

    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(archive_error)?
            .to_string_lossy()
            .into_owned();
        if !matcher.matches(&name) {
            continue;
        }
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).map_err(archive_error)?;
        matched.push((name, contents));
    }

    Ok(matched)
}
