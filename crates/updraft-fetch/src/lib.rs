//! # Updraft Fetch
//!
//! Turns an approved version into verified bytes in the staging directory.
//!
//! ## Overview
//!
//! - [`VersionSource`]: one implementation per upstream platform
//!   ([`PaperSource`], [`GithubSource`], [`JenkinsSource`], [`StorefrontSource`]),
//!   selected per artifact through a [`SourceSet`]
//! - [`extract_single`]: resolves the artifact inside zip or tar.gz payloads
//!   with an exact-path or full-match pattern selector
//! - [`StagingArea`]: atomic replacement of staged files
//! - [`ArtifactFetcher`]: idempotent download, SHA-256 verification, staging
//!   and the `fetched` transition in the registry
//!
//! A fetch that fails at any step leaves both the registry record and the
//! previously staged file untouched.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod archive;
pub mod error;
pub mod fetcher;
pub mod source;
pub mod staging;

pub use archive::{extract_single, ArchiveFormat, ArchiveSpec, EntrySelector};
pub use error::{FetchError, Result, SelectorError, SourceError};
pub use fetcher::{ArtifactFetcher, ArtifactTarget, FetchedArtifact};
pub use source::{
    http_client, BrowserSession, Detection, FetchedBytes, GithubSource, HttpSettings,
    JenkinsSource, PaperSource, SourceKind, SourceSet, SourceSpec, StorefrontListing,
    StorefrontSource, VersionSource, DEFAULT_GITHUB_API, DEFAULT_PAPER_API,
};
pub use staging::StagingArea;
