//! Storage layer for the registry
//!
//! Provides persistent storage for artifact and server records.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ArtifactStore, RegistryStore, ServerStore, StoreResult};
