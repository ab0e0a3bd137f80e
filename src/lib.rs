//! apisync - Sync engine for an API-testing workspace.
//!
//! Collections are mirrored to a Git remote (one atomic commit per
//! collection, sha-based conflict detection). Environments are mirrored to a
//! secret store.

pub mod config;
pub mod credentials;
pub mod error;
pub mod notify;
pub mod sync;
pub mod workspace;

pub use config::{Config, SettingsStore};
pub use error::{Result, SyncError};
pub use notify::{LogSink, Notification, NotificationSink};
pub use sync::{RemoteSyncService, SyncResult, VaultSyncService, VaultSyncSummary};
pub use workspace::{Collection, Environment, WorkspaceStore};
