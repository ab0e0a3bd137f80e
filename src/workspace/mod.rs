//! Workspace module - Local state the sync engine reconciles.
//!
//! This module contains:
//! - Data model (collections, requests, environments, per-collection sync marker)
//! - WorkspaceStore trait, the seam to local persistence
//! - In-memory and SQLite implementations

pub mod memory;
pub mod model;
pub mod sqlite;

pub use memory::MemoryWorkspace;
pub use model::{ApiRequest, Collection, CollectionRecord, Environment, SyncState};
pub use sqlite::SqliteWorkspace;

use anyhow::Result;

/// Local workspace persistence as seen by the sync services.
///
/// Implementations are expected to be internally synchronised; the sync
/// services share one store between the file and secret sync paths.
pub trait WorkspaceStore: Send + Sync {
    /// All collections with their sync markers, ordered by id.
    fn list_collections(&self) -> Result<Vec<CollectionRecord>>;

    fn get_collection(&self, id: &str) -> Result<Option<CollectionRecord>>;

    /// Write a collection reconciled with the remote, replacing its sync state.
    fn upsert_collection(&self, collection: &Collection, state: &SyncState) -> Result<()>;

    /// Replace only the sync state of an existing collection.
    fn update_sync_state(&self, id: &str, state: &SyncState) -> Result<()>;

    /// Store a user edit and flag the collection as locally modified.
    fn save_local_edit(&self, collection: &Collection) -> Result<()>;

    fn list_environments(&self) -> Result<Vec<Environment>>;

    fn upsert_environment(&self, environment: &Environment) -> Result<()>;
}
