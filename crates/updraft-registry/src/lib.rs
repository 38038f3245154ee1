//! Updraft Version Registry
//!
//! Owns every mutation of [`ArtifactRecord`] and [`ServerRecord`]. Other
//! components read snapshots and submit intents ("approve X iff latest is X",
//! "mark X fetched iff approved is X"); the registry applies each intent under
//! a lock scoped to the single artifact or server it touches, so overlapping
//! reconciliation passes never lose updates while unrelated keys proceed in
//! parallel.
//!
//! ## Backends
//!
//! - [`InMemoryStore`]: development and tests
//! - [`SqliteStore`]: durable storage through `sqlx`
//!
//! [`ArtifactRecord`]: updraft_types::ArtifactRecord
//! [`ServerRecord`]: updraft_types::ServerRecord

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod registry;
pub mod store;

pub use error::{RegistryError, Result, StorageError};
pub use registry::VersionRegistry;
pub use store::{ArtifactStore, InMemoryStore, RegistryStore, ServerStore, SqliteStore};
