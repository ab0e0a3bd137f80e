//! Sync module - Keeps the local workspace in step with remote backends.
//!
//! This module contains:
//! - Provider traits for Git-compatible file trees and secret stores
//! - GitHub and HashiCorp Vault providers, plus in-memory ones for tests
//! - `RemoteSyncService` (collections) and `VaultSyncService` (environments)
//! - Startup auto-sync gated by user settings

mod guard;

pub mod github;
pub mod hashicorp;
pub mod layout;
pub mod memory;
pub mod provider;
pub mod remote;
pub mod result;
pub mod startup;
pub mod vault;

pub use github::GitHubProvider;
pub use hashicorp::HashiCorpVaultProvider;
pub use memory::{MemoryRemote, MemorySecretStore};
pub use provider::{
    CommitInfo, EntryKind, FileChanges, FileContent, RemoteFileProvider, SecretStoreProvider,
    TreeEntry,
};
pub use remote::RemoteSyncService;
pub use result::{ConflictEntry, SyncResult, VaultSyncSummary};
pub use startup::{run_startup_sync, StartupReport};
pub use vault::VaultSyncService;
