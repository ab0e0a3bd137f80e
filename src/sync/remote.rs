//! RemoteSyncService - Reconciles workspace collections with a Git remote.
//!
//! Per call: Idle -> Diffing -> Transferring -> {Completed, ConflictReported}.
//!
//! Diffing uses one metadata-only recursive listing of the collections root and
//! compares file shas against the last known remote state of every collection.
//! Content is only transferred for collections that actually changed.
//!
//! Push re-lists each collection right before committing it and parents the
//! commit on the head that listing was checked against. If the branch moves in
//! between, the commit is rejected and the collection is verified once more.
//!
//! Tie-break: the remote wins only when the local copy is unchanged since the
//! last sync. A user's unpushed edit is never overwritten; the collection is
//! reported as a conflict instead.

use super::guard::BusyFlag;
use super::layout;
use super::provider::{FileChanges, RemoteFileProvider};
use super::result::{ConflictEntry, SyncResult};
use crate::config::{SettingsStore, REMOTE_AUTO_SYNC};
use crate::error::{Result, SyncError};
use crate::workspace::{CollectionRecord, SyncState, WorkspaceStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Remote path -> sha, for the files of one collection.
type FileShas = BTreeMap<String, String>;

/// Orchestrates pull/push of collections against a `RemoteFileProvider`.
///
/// Collections are processed one after another. A failure or conflict in one
/// collection is recorded in the result and the batch continues.
pub struct RemoteSyncService {
    provider: Box<dyn RemoteFileProvider>,
    store: Arc<dyn WorkspaceStore>,
    base_path: String,
    busy: BusyFlag,
}

impl RemoteSyncService {
    pub fn new(
        provider: Box<dyn RemoteFileProvider>,
        store: Arc<dyn WorkspaceStore>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            base_path: base_path.into(),
            busy: BusyFlag::default(),
        }
    }

    /// Sync is a silent no-op when this is false.
    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn test_connection(&self) -> bool {
        self.is_configured() && self.provider.test_connection()
    }

    /// Bring remote changes into the workspace.
    pub fn pull(&self) -> Result<SyncResult> {
        if !self.is_configured() {
            debug!("[RemoteSync] Remote not configured, skipping pull");
            return Ok(SyncResult::default());
        }
        let _guard = self.busy.acquire("Remote")?;
        info!("[RemoteSync] Pulling from {}...", self.provider.name());

        let remote = self.remote_snapshot()?;
        let mut result = SyncResult::default();

        for (id, remote_shas) in &remote {
            match self.pull_collection(id, remote_shas) {
                Ok(true) => result.pulled += 1,
                Ok(false) => {}
                Err(e) => self.record_failure(&mut result, id, e),
            }
        }

        info!(
            "[RemoteSync] Pull complete: pulled={}, conflicts={}, errors={}",
            result.pulled,
            result.conflicts.len(),
            result.errors.len()
        );
        Ok(result)
    }

    /// Commit every locally modified collection, one atomic commit each.
    pub fn push(&self) -> Result<SyncResult> {
        if !self.is_configured() {
            debug!("[RemoteSync] Remote not configured, skipping push");
            return Ok(SyncResult::default());
        }
        let _guard = self.busy.acquire("Remote")?;

        let pending: Vec<CollectionRecord> = self
            .store
            .list_collections()?
            .into_iter()
            .filter(|r| r.sync.locally_modified)
            .collect();
        let mut result = SyncResult::default();
        if pending.is_empty() {
            debug!("[RemoteSync] Nothing to push");
            return Ok(result);
        }

        info!(
            "[RemoteSync] Pushing {} collection(s) to {}...",
            pending.len(),
            self.provider.name()
        );
        // An unreachable remote fails the whole call, not each collection.
        let mut head = self.provider.head_commit()?;

        for record in &pending {
            match self.push_collection(record, &mut head) {
                Ok(()) => result.pushed += 1,
                Err(e) => self.record_failure(&mut result, &record.collection.id, e),
            }
        }

        info!(
            "[RemoteSync] Push complete: pushed={}, conflicts={}, errors={}",
            result.pushed,
            result.conflicts.len(),
            result.errors.len()
        );
        Ok(result)
    }

    /// Pull then push, merged into one result.
    pub fn sync(&self) -> Result<SyncResult> {
        let mut result = self.pull()?;
        result.merge(self.push()?);
        Ok(result)
    }

    /// Pull only if `remote.auto_sync` is on. `Ok(None)` means nothing ran.
    pub fn auto_pull(&self, settings: &dyn SettingsStore) -> Result<Option<SyncResult>> {
        if !self.auto_sync_enabled(settings) {
            return Ok(None);
        }
        self.pull().map(Some)
    }

    /// Push only if `remote.auto_sync` is on. `Ok(None)` means nothing ran.
    pub fn auto_push(&self, settings: &dyn SettingsStore) -> Result<Option<SyncResult>> {
        if !self.auto_sync_enabled(settings) {
            return Ok(None);
        }
        self.push().map(Some)
    }

    fn auto_sync_enabled(&self, settings: &dyn SettingsStore) -> bool {
        if !settings.get_setting(REMOTE_AUTO_SYNC, false) {
            debug!("[RemoteSync] Auto-sync disabled");
            return false;
        }
        self.is_configured()
    }

    /// File shas of every collection on the remote, grouped by collection id.
    fn remote_snapshot(&self) -> Result<BTreeMap<String, FileShas>> {
        let root = layout::collections_root(&self.base_path);
        let entries = match self.provider.list_directory_recursive(&root) {
            Ok(entries) => entries,
            // Nothing has been pushed yet
            Err(e) if e.is_not_found() => return Ok(BTreeMap::new()),
            Err(e) => return Err(e),
        };

        let mut collections: BTreeMap<String, FileShas> = BTreeMap::new();
        for entry in entries.into_iter().filter(|e| e.is_file()) {
            if let Some(id) = layout::collection_id_of(&root, &entry.path) {
                collections
                    .entry(id.to_string())
                    .or_default()
                    .insert(entry.path, entry.sha);
            }
        }
        debug!("[RemoteSync] Remote has {} collection(s)", collections.len());
        Ok(collections)
    }

    /// Apply the remote copy of one collection. `Ok(false)` when already in sync.
    fn pull_collection(&self, id: &str, remote_shas: &FileShas) -> Result<bool> {
        let local = self.store.get_collection(id)?;

        if let Some(record) = &local {
            if record.sync.file_shas == *remote_shas {
                return Ok(false);
            }
            if record.sync.locally_modified {
                return Err(SyncError::conflict(changed_paths(
                    &record.sync.file_shas,
                    remote_shas,
                )));
            }
        }

        let dir = layout::collection_dir(&self.base_path, id);
        let files = self.provider.get_directory_tree(&dir)?;
        let collection = layout::decode_collection(&dir, &files)?;
        if collection.id != id {
            return Err(SyncError::Decode(format!(
                "{} declares id '{}'",
                dir, collection.id
            )));
        }

        let file_shas: FileShas = files
            .iter()
            .filter_map(|f| f.sha.clone().map(|sha| (f.path.clone(), sha)))
            .collect();
        let commit_sha = files.iter().find_map(|f| f.commit_sha.clone());

        self.store
            .upsert_collection(&collection, &SyncState::synced(file_shas, commit_sha))?;
        debug!("[RemoteSync] Pulled collection {} ({})", collection.name, id);
        Ok(true)
    }

    /// Commit one collection on top of `head`, which is advanced on success.
    ///
    /// The collection's remote files must still match the last synced state.
    /// A rejected commit means the branch moved; the check runs once more
    /// against the new head so an unrelated commit does not fail the push.
    fn push_collection(
        &self,
        record: &CollectionRecord,
        head: &mut Option<String>,
    ) -> Result<()> {
        let collection = &record.collection;
        let files = layout::encode_collection(&self.base_path, collection)?;
        let dir = layout::collection_dir(&self.base_path, &collection.id);
        let message = format!("Update collection {} ({})", collection.name, collection.id);
        let mut retried = false;

        loop {
            let remote_shas = self.collection_shas(&dir)?;
            if record.sync.file_shas != remote_shas {
                return Err(SyncError::conflict(changed_paths(
                    &record.sync.file_shas,
                    &remote_shas,
                )));
            }

            let mut changes: FileChanges = remote_shas
                .keys()
                .filter(|path| !files.contains_key(*path))
                .map(|path| (path.clone(), None))
                .collect();
            changes.extend(
                files
                    .iter()
                    .map(|(path, content)| (path.clone(), Some(content.clone()))),
            );

            match self
                .provider
                .commit_multiple_files(&changes, &message, head.as_deref())
            {
                Ok(commit) => {
                    debug!(
                        "[RemoteSync] Committed {} file(s) for {} as {}",
                        changes.len(),
                        collection.id,
                        commit.sha
                    );
                    self.store.update_sync_state(
                        &collection.id,
                        &SyncState::synced(commit.file_shas, Some(commit.sha.clone())),
                    )?;
                    *head = Some(commit.sha);
                    return Ok(());
                }
                Err(e) if e.is_conflict() && !retried => {
                    debug!(
                        "[RemoteSync] Branch moved while pushing {}, checking again",
                        collection.id
                    );
                    retried = true;
                    *head = self.provider.head_commit()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Current file shas under one collection directory.
    fn collection_shas(&self, dir: &str) -> Result<FileShas> {
        match self.provider.list_directory_recursive(dir) {
            Ok(entries) => Ok(entries
                .into_iter()
                .filter(|e| e.is_file())
                .map(|e| (e.path, e.sha))
                .collect()),
            // Never pushed
            Err(e) if e.is_not_found() => Ok(FileShas::new()),
            Err(e) => Err(e),
        }
    }

    /// Route a per-collection failure into `conflicts` or `errors`.
    fn record_failure(&self, result: &mut SyncResult, id: &str, err: SyncError) {
        let name = self.collection_name(id);
        match err {
            SyncError::Conflict { paths } => {
                warn!("[RemoteSync] Conflict in {} ({}): {:?}", name, id, paths);
                result.conflicts.push(ConflictEntry {
                    collection_id: id.to_string(),
                    collection_name: name,
                });
            }
            other => {
                warn!("[RemoteSync] {} ({}) failed: {}", name, id, other);
                result.errors.push(format!("{}: {}", name, other));
            }
        }
    }

    fn collection_name(&self, id: &str) -> String {
        match self.store.get_collection(id) {
            Ok(Some(record)) => record.collection.name,
            _ => id.to_string(),
        }
    }
}

/// Paths whose sha differs between the last known state and the remote.
fn changed_paths(known: &FileShas, remote: &FileShas) -> Vec<String> {
    let all: BTreeSet<&String> = known.keys().chain(remote.keys()).collect();
    all.into_iter()
        .filter(|path| known.get(*path) != remote.get(*path))
        .cloned()
        .collect()
}
