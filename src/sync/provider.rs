//! Provider traits - Abstraction over remote backends.
//!
//! Two capabilities are modelled separately:
//! - `RemoteFileProvider`: a Git-compatible file tree with sha-based optimistic locking
//! - `SecretStoreProvider`: a hierarchical key/value secret store without versioning
//!
//! The sync services depend only on these traits.

use crate::error::Result;
use std::collections::BTreeMap;

/// One file at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Path relative to the repository root.
    pub path: String,
    pub content: String,
    /// Content hash known to the remote. `None` for files the remote has never seen.
    pub sha: Option<String>,
    /// Commit that produced this state. `None` before any commit exists.
    pub commit_sha: Option<String>,
}

impl FileContent {
    /// A file not yet known to the remote.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            sha: None,
            commit_sha: None,
        }
    }
}

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Metadata-only listing entry, used to diff trees without transferring content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub kind: EntryKind,
    pub path: String,
    pub sha: String,
}

impl TreeEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Files written by one atomic commit: path -> new content, `None` removes the path.
pub type FileChanges = BTreeMap<String, Option<String>>;

/// Outcome of `commit_multiple_files`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// The new commit.
    pub sha: String,
    /// Remote sha of every path written by the commit. Removed paths are absent.
    pub file_shas: BTreeMap<String, String>,
}

/// Primitive access to a Git-compatible remote tree.
///
/// Every call is independent; implementations hold no per-sync state.
pub trait RemoteFileProvider: Send + Sync {
    /// Provider name (github, memory)
    fn name(&self) -> &'static str;

    /// Whether enough configuration is present to talk to the remote.
    fn is_configured(&self) -> bool {
        true
    }

    /// Direct file children of `path`, with content and sha.
    fn list_files(&self, path: &str) -> Result<Vec<FileContent>>;

    /// Every file and directory below `path`, without content.
    fn list_directory_recursive(&self, path: &str) -> Result<Vec<TreeEntry>>;

    /// Every file below `path`, with content.
    fn get_directory_tree(&self, path: &str) -> Result<Vec<FileContent>>;

    /// `Ok(None)` when the path does not exist.
    fn get_file(&self, path: &str) -> Result<Option<FileContent>>;

    /// Create a new file. Fails with `AlreadyExists` if the path is taken.
    /// Returns the new sha.
    fn create_file(&self, path: &str, content: &str, message: &str) -> Result<String>;

    /// Update an existing file. Fails with `Conflict` if `sha` is not the current sha.
    /// Returns the new sha.
    fn update_file(&self, path: &str, content: &str, sha: &str, message: &str) -> Result<String>;

    /// Delete a file under the same optimistic lock as `update_file`.
    fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<()>;

    /// Remove `path` and everything below it in one logical operation.
    fn delete_directory(&self, path: &str, message: &str) -> Result<()>;

    /// Current head commit of the branch, `None` before the first commit.
    fn head_commit(&self) -> Result<Option<String>>;

    /// Write all `changes` as a single commit: either every change lands or none does.
    ///
    /// With `expected_head`, the commit is parented on that commit and fails
    /// with `Conflict` if the branch has moved past it.
    fn commit_multiple_files(
        &self,
        changes: &FileChanges,
        message: &str,
        expected_head: Option<&str>,
    ) -> Result<CommitInfo>;

    /// Reachability and auth check. Never errors on ordinary connectivity failure.
    fn test_connection(&self) -> bool;
}

/// Primitive access to a hierarchical key/value secret store.
///
/// Writes overwrite in place; there is no sha or version to lock on.
pub trait SecretStoreProvider: Send + Sync {
    /// Provider name (hashicorp, memory)
    fn name(&self) -> &'static str;

    fn is_configured(&self) -> bool {
        true
    }

    /// Secret names directly under `base_path`, or under the mount root.
    fn list_secrets(&self, base_path: Option<&str>) -> Result<Vec<String>>;

    /// `Ok(None)` when nothing is stored at `path`.
    fn get_secrets(&self, path: &str) -> Result<Option<BTreeMap<String, String>>>;

    /// Replace the full key/value set at `path`. Not a merge.
    fn put_secrets(&self, path: &str, secrets: &BTreeMap<String, String>) -> Result<()>;

    /// Remove every key at `path`.
    fn delete_secrets(&self, path: &str) -> Result<()>;

    /// Same non-throwing contract as `RemoteFileProvider::test_connection`.
    fn test_connection(&self) -> bool;
}

/// Join path segments with `/`, skipping empty ones.
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_matches('/');
    let child = child.trim_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, child),
    }
}

/// Whether `path` is `dir` itself or lies below it.
pub fn is_under(path: &str, dir: &str) -> bool {
    let dir = dir.trim_matches('/');
    dir.is_empty()
        || path == dir
        || (path.starts_with(dir) && path.as_bytes().get(dir.len()) == Some(&b'/'))
}
