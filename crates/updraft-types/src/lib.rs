//! Updraft Types - Core types for the update lifecycle
//!
//! Updraft tracks the newest version of a server runtime build and a set of
//! plugins, promotes new versions only after a human approves them, stages the
//! approved bytes locally and rolls them out to running instances.
//!
//! ## Key Concepts
//!
//! - **ArtifactRecord**: staged state of one artifact (latest → approved → fetched)
//! - **ServerRecord**: what has been confirmed running on one server
//! - **ArtifactRef**: opaque locator handed back by a version source
//! - **Events**: unified lifecycle stream for observability

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod artifact;
pub mod events;
pub mod ids;
pub mod server;

pub use artifact::{ArtifactRecord, ArtifactRef, LatestChange};
pub use events::{EventSeverity, EventSource, UpdaterEvent, UpdaterEventEnvelope};
pub use ids::{ArtifactId, ArtifactKey, ArtifactKind, InstanceId, MessageId, ParseKindError, ServerName, VersionId};
pub use server::{DeploymentCommit, ServerRecord};
