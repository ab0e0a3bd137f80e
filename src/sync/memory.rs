//! In-memory providers.
//!
//! Both providers are cheap cloneable handles over shared state, so a test can
//! hand one clone to a sync service and keep another to inspect the remote.
//! Failures can be injected per path prefix, and every trait call is counted.

use super::provider::{
    is_under, CommitInfo, EntryKind, FileChanges, FileContent, RemoteFileProvider,
    SecretStoreProvider, TreeEntry,
};
use crate::error::{Result, SyncError};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Git-style content hash (`blob <len>\0<content>`), SHA-256 object format.
pub fn content_sha(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| SyncError::Other(anyhow::anyhow!("Provider lock poisoned: {}", e)))
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    sha: String,
}

type CommitHook = Box<dyn FnOnce(&MemoryRemote) + Send>;

#[derive(Default)]
struct RemoteState {
    files: BTreeMap<String, StoredFile>,
    head: Option<String>,
    commit_count: u64,
    calls: usize,
    unavailable: bool,
    failing_paths: Vec<(String, String)>,
    commit_fails_after: Option<usize>,
    before_commit: Option<CommitHook>,
}

impl RemoteState {
    fn check(&self, path: &str) -> Result<()> {
        if self.unavailable {
            return Err(SyncError::RemoteUnavailable("connection refused".to_string()));
        }
        for (prefix, message) in &self.failing_paths {
            if is_under(path, prefix) {
                return Err(SyncError::RemoteUnavailable(message.clone()));
            }
        }
        Ok(())
    }

    fn files_under<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = (&'a String, &'a StoredFile)> {
        self.files
            .iter()
            .filter(move |(path, _)| is_under(path, dir) && path.as_str() != dir.trim_matches('/'))
    }

    fn next_commit(&mut self, message: &str) -> String {
        self.commit_count += 1;
        let mut hasher = Sha256::new();
        hasher.update(format!("commit {}\0{}", self.commit_count, message).as_bytes());
        if let Some(parent) = &self.head {
            hasher.update(parent.as_bytes());
        }
        let sha = format!("{:x}", hasher.finalize());
        self.head = Some(sha.clone());
        sha
    }

    fn file_content(&self, path: &str, file: &StoredFile) -> FileContent {
        FileContent {
            path: path.to_string(),
            content: file.content.clone(),
            sha: Some(file.sha.clone()),
            commit_sha: self.head.clone(),
        }
    }
}

/// In-memory Git-like remote.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a file directly, as if someone else committed it. Returns the sha.
    pub fn seed_file(&self, path: &str, content: &str) -> Result<String> {
        let mut state = lock(&self.state)?;
        let sha = content_sha(content);
        state.files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                sha: sha.clone(),
            },
        );
        state.next_commit("seed");
        Ok(sha)
    }

    /// Current content of a file, bypassing call counting and failure injection.
    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state)
            .ok()
            .and_then(|s| s.files.get(path).map(|f| f.content.clone()))
    }

    pub fn paths(&self) -> Vec<String> {
        lock(&self.state)
            .map(|s| s.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn head(&self) -> Option<String> {
        lock(&self.state).ok().and_then(|s| s.head.clone())
    }

    /// Number of trait calls made so far.
    pub fn call_count(&self) -> usize {
        lock(&self.state).map(|s| s.calls).unwrap_or(0)
    }

    /// Make every call fail as if the network were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = lock(&self.state) {
            state.unavailable = unavailable;
        }
    }

    /// Make every call touching `prefix` fail with `message`.
    pub fn fail_path(&self, prefix: &str, message: &str) {
        if let Ok(mut state) = lock(&self.state) {
            state
                .failing_paths
                .push((prefix.trim_matches('/').to_string(), message.to_string()));
        }
    }

    /// Make the next multi-file commit fail after staging `applied` changes.
    pub fn fail_next_commit_after(&self, applied: usize) {
        if let Ok(mut state) = lock(&self.state) {
            state.commit_fails_after = Some(applied);
        }
    }

    /// Run `hook` once, right before the next multi-file commit is applied.
    /// The hook sees the remote as another client would.
    pub fn before_next_commit(&self, hook: impl FnOnce(&MemoryRemote) + Send + 'static) {
        if let Ok(mut state) = lock(&self.state) {
            state.before_commit = Some(Box::new(hook));
        }
    }

    fn begin(&self) -> Result<MutexGuard<'_, RemoteState>> {
        let mut state = lock(&self.state)?;
        state.calls += 1;
        Ok(state)
    }
}

impl RemoteFileProvider for MemoryRemote {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn list_files(&self, path: &str) -> Result<Vec<FileContent>> {
        let state = self.begin()?;
        state.check(path)?;
        let dir = path.trim_matches('/');

        let mut found_any = false;
        let mut files = Vec::new();
        for (file_path, file) in state.files_under(dir) {
            found_any = true;
            let rest = if dir.is_empty() {
                file_path.as_str()
            } else {
                &file_path[dir.len() + 1..]
            };
            if !rest.contains('/') {
                files.push(state.file_content(file_path, file));
            }
        }

        if !found_any && !dir.is_empty() {
            return Err(SyncError::NotFound(dir.to_string()));
        }
        Ok(files)
    }

    fn list_directory_recursive(&self, path: &str) -> Result<Vec<TreeEntry>> {
        let state = self.begin()?;
        state.check(path)?;
        let dir = path.trim_matches('/');

        let mut entries = Vec::new();
        let mut dirs: BTreeMap<String, Sha256> = BTreeMap::new();
        for (file_path, file) in state.files_under(dir) {
            entries.push(TreeEntry {
                kind: EntryKind::File,
                path: file_path.clone(),
                sha: file.sha.clone(),
            });

            // Every ancestor strictly below `dir` is a directory entry.
            let mut ancestor = file_path.as_str();
            while let Some(idx) = ancestor.rfind('/') {
                ancestor = &ancestor[..idx];
                if ancestor.len() <= dir.len() {
                    break;
                }
                dirs.entry(ancestor.to_string())
                    .or_default()
                    .update(file.sha.as_bytes());
            }
        }

        if entries.is_empty() && !dir.is_empty() {
            return Err(SyncError::NotFound(dir.to_string()));
        }

        entries.extend(dirs.into_iter().map(|(path, hasher)| TreeEntry {
            kind: EntryKind::Dir,
            path,
            sha: format!("{:x}", hasher.finalize()),
        }));
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn get_directory_tree(&self, path: &str) -> Result<Vec<FileContent>> {
        let state = self.begin()?;
        state.check(path)?;
        let dir = path.trim_matches('/');

        let files: Vec<FileContent> = state
            .files_under(dir)
            .map(|(p, f)| state.file_content(p, f))
            .collect();
        if files.is_empty() && !dir.is_empty() {
            return Err(SyncError::NotFound(dir.to_string()));
        }
        Ok(files)
    }

    fn get_file(&self, path: &str) -> Result<Option<FileContent>> {
        let state = self.begin()?;
        state.check(path)?;
        Ok(state.files.get(path).map(|f| state.file_content(path, f)))
    }

    fn create_file(&self, path: &str, content: &str, message: &str) -> Result<String> {
        let mut state = self.begin()?;
        state.check(path)?;
        if state.files.contains_key(path) {
            return Err(SyncError::AlreadyExists(path.to_string()));
        }
        let sha = content_sha(content);
        state.files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                sha: sha.clone(),
            },
        );
        state.next_commit(message);
        Ok(sha)
    }

    fn update_file(&self, path: &str, content: &str, sha: &str, message: &str) -> Result<String> {
        let mut state = self.begin()?;
        state.check(path)?;
        let current = state
            .files
            .get(path)
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        if current.sha != sha {
            return Err(SyncError::conflict([path]));
        }
        let new_sha = content_sha(content);
        state.files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                sha: new_sha.clone(),
            },
        );
        state.next_commit(message);
        Ok(new_sha)
    }

    fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<()> {
        let mut state = self.begin()?;
        state.check(path)?;
        let current = state
            .files
            .get(path)
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;
        if current.sha != sha {
            return Err(SyncError::conflict([path]));
        }
        state.files.remove(path);
        state.next_commit(message);
        Ok(())
    }

    fn delete_directory(&self, path: &str, message: &str) -> Result<()> {
        let mut state = self.begin()?;
        state.check(path)?;
        let dir = path.trim_matches('/');
        let doomed: Vec<String> = state.files_under(dir).map(|(p, _)| p.clone()).collect();
        if doomed.is_empty() {
            return Err(SyncError::NotFound(dir.to_string()));
        }
        for p in doomed {
            state.files.remove(&p);
        }
        state.next_commit(message);
        Ok(())
    }

    fn head_commit(&self) -> Result<Option<String>> {
        let state = self.begin()?;
        state.check("")?;
        Ok(state.head.clone())
    }

    fn commit_multiple_files(
        &self,
        changes: &FileChanges,
        message: &str,
        expected_head: Option<&str>,
    ) -> Result<CommitInfo> {
        let hook = lock(&self.state)?.before_commit.take();
        if let Some(hook) = hook {
            hook(self);
        }

        let mut state = self.begin()?;
        for path in changes.keys() {
            state.check(path)?;
        }
        if let Some(expected) = expected_head {
            if state.head.as_deref() != Some(expected) {
                return Err(SyncError::conflict(changes.keys()));
            }
        }

        // Stage on a copy; the real tree only changes once every write succeeded.
        let fail_after = state.commit_fails_after.take();
        let mut staged = state.files.clone();
        let mut file_shas = BTreeMap::new();
        for (applied, (path, change)) in changes.iter().enumerate() {
            if fail_after == Some(applied) {
                return Err(SyncError::RemoteUnavailable(format!(
                    "commit interrupted after {} of {} files",
                    applied,
                    changes.len()
                )));
            }
            match change {
                Some(content) => {
                    let sha = content_sha(content);
                    file_shas.insert(path.clone(), sha.clone());
                    staged.insert(
                        path.clone(),
                        StoredFile {
                            content: content.clone(),
                            sha,
                        },
                    );
                }
                None => {
                    staged.remove(path);
                }
            }
        }

        state.files = staged;
        Ok(CommitInfo {
            sha: state.next_commit(message),
            file_shas,
        })
    }

    fn test_connection(&self) -> bool {
        match self.begin() {
            Ok(state) => !state.unavailable,
            Err(_) => false,
        }
    }
}

#[derive(Default)]
struct SecretState {
    secrets: BTreeMap<String, BTreeMap<String, String>>,
    calls: usize,
    unavailable: bool,
    failing_paths: Vec<(String, String)>,
}

impl SecretState {
    fn check(&self, path: &str) -> Result<()> {
        if self.unavailable {
            return Err(SyncError::RemoteUnavailable("connection refused".to_string()));
        }
        for (prefix, message) in &self.failing_paths {
            if is_under(path, prefix) {
                return Err(SyncError::RemoteUnavailable(message.clone()));
            }
        }
        Ok(())
    }
}

/// In-memory key/value secret store.
#[derive(Clone, Default)]
pub struct MemorySecretStore {
    state: Arc<Mutex<SecretState>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store secrets directly, as if written by another client.
    pub fn seed(&self, path: &str, secrets: &[(&str, &str)]) {
        if let Ok(mut state) = lock(&self.state) {
            state.secrets.insert(
                path.trim_matches('/').to_string(),
                secrets
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
    }

    pub fn secret(&self, path: &str) -> Option<BTreeMap<String, String>> {
        lock(&self.state)
            .ok()
            .and_then(|s| s.secrets.get(path.trim_matches('/')).cloned())
    }

    pub fn call_count(&self) -> usize {
        lock(&self.state).map(|s| s.calls).unwrap_or(0)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = lock(&self.state) {
            state.unavailable = unavailable;
        }
    }

    pub fn fail_path(&self, prefix: &str, message: &str) {
        if let Ok(mut state) = lock(&self.state) {
            state
                .failing_paths
                .push((prefix.trim_matches('/').to_string(), message.to_string()));
        }
    }

    fn begin(&self) -> Result<MutexGuard<'_, SecretState>> {
        let mut state = lock(&self.state)?;
        state.calls += 1;
        Ok(state)
    }
}

impl SecretStoreProvider for MemorySecretStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn list_secrets(&self, base_path: Option<&str>) -> Result<Vec<String>> {
        let state = self.begin()?;
        let base = base_path.unwrap_or("").trim_matches('/');
        state.check(base)?;

        let names: BTreeSet<String> = state
            .secrets
            .keys()
            .filter(|p| is_under(p, base) && p.as_str() != base)
            .filter_map(|p| {
                let rest = if base.is_empty() { p.as_str() } else { &p[base.len() + 1..] };
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        Ok(names.into_iter().collect())
    }

    fn get_secrets(&self, path: &str) -> Result<Option<BTreeMap<String, String>>> {
        let state = self.begin()?;
        let path = path.trim_matches('/');
        state.check(path)?;
        Ok(state.secrets.get(path).cloned())
    }

    fn put_secrets(&self, path: &str, secrets: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.begin()?;
        let path = path.trim_matches('/');
        state.check(path)?;
        state.secrets.insert(path.to_string(), secrets.clone());
        Ok(())
    }

    fn delete_secrets(&self, path: &str) -> Result<()> {
        let mut state = self.begin()?;
        let path = path.trim_matches('/');
        state.check(path)?;
        state.secrets.remove(path);
        Ok(())
    }

    fn test_connection(&self) -> bool {
        match self.begin() {
            Ok(state) => !state.unavailable,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_requires_current_sha() -> Result<()> {
        let remote = MemoryRemote::new();
        let stale = remote.create_file("a/b.json", "{}", "create")?;
        let current = remote.update_file("a/b.json", "{\"v\":1}", &stale, "edit")?;

        let err = remote
            .update_file("a/b.json", "{\"v\":2}", &stale, "stale edit")
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(remote.file("a/b.json").as_deref(), Some("{\"v\":1}"));

        remote.update_file("a/b.json", "{\"v\":2}", &current, "fresh edit")?;
        assert_eq!(remote.file("a/b.json").as_deref(), Some("{\"v\":2}"));
        Ok(())
    }

    #[test]
    fn test_create_existing_fails() -> Result<()> {
        let remote = MemoryRemote::new();
        remote.create_file("x.json", "1", "create")?;
        let err = remote.create_file("x.json", "2", "again").unwrap_err();
        assert!(matches!(err, SyncError::AlreadyExists(_)));
        Ok(())
    }

    #[test]
    fn test_delete_with_stale_sha_conflicts() -> Result<()> {
        let remote = MemoryRemote::new();
        let sha = remote.create_file("x.json", "1", "create")?;
        remote.update_file("x.json", "2", &sha, "edit")?;
        assert!(remote.delete_file("x.json", &sha, "delete").unwrap_err().is_conflict());
        assert!(remote.file("x.json").is_some());
        Ok(())
    }

    #[test]
    fn test_listings() -> Result<()> {
        let remote = MemoryRemote::new();
        remote.seed_file("root/c1/collection.json", "{}")?;
        remote.seed_file("root/c1/requests/r1.json", "{}")?;
        remote.seed_file("root/other.json", "{}")?;

        let direct = remote.list_files("root/c1")?;
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].path, "root/c1/collection.json");
        assert!(direct[0].sha.is_some());

        let entries = remote.list_directory_recursive("root")?;
        let dirs: Vec<&str> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Dir)
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(dirs, vec!["root/c1", "root/c1/requests"]);
        assert_eq!(entries.iter().filter(|e| e.is_file()).count(), 3);

        let tree = remote.get_directory_tree("root/c1")?;
        assert_eq!(tree.len(), 2);
        assert!(tree.iter().all(|f| f.commit_sha == remote.head()));

        assert!(remote.get_file("root/missing.json")?.is_none());
        assert!(remote.list_directory_recursive("nope").unwrap_err().is_not_found());
        Ok(())
    }

    #[test]
    fn test_interrupted_commit_leaves_tree_untouched() -> Result<()> {
        let remote = MemoryRemote::new();
        remote.seed_file("a.json", "old")?;
        let head = remote.head();

        let mut changes = FileChanges::new();
        changes.insert("a.json".to_string(), Some("new".to_string()));
        changes.insert("b.json".to_string(), Some("new".to_string()));
        remote.fail_next_commit_after(1);

        assert!(remote.commit_multiple_files(&changes, "batch", None).is_err());
        assert_eq!(remote.file("a.json").as_deref(), Some("old"));
        assert!(remote.file("b.json").is_none());
        assert_eq!(remote.head(), head);

        // The failure is one-shot.
        let commit = remote.commit_multiple_files(&changes, "batch", head.as_deref())?;
        assert_eq!(remote.file("b.json").as_deref(), Some("new"));
        assert_eq!(remote.head(), Some(commit.sha));
        assert_eq!(commit.file_shas["b.json"], content_sha("new"));
        Ok(())
    }

    #[test]
    fn test_commit_on_moved_head_conflicts() -> Result<()> {
        let remote = MemoryRemote::new();
        remote.seed_file("a.json", "old")?;
        let seen = remote.head_commit()?;
        remote.seed_file("other.json", "theirs")?;

        let mut changes = FileChanges::new();
        changes.insert("a.json".to_string(), Some("ours".to_string()));
        changes.insert("gone.json".to_string(), None);

        let err = remote
            .commit_multiple_files(&changes, "batch", seen.as_deref())
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(remote.file("a.json").as_deref(), Some("old"));

        let commit = remote.commit_multiple_files(&changes, "batch", remote.head().as_deref())?;
        assert_eq!(commit.file_shas.len(), 1);
        assert!(!commit.file_shas.contains_key("gone.json"));
        Ok(())
    }

    #[test]
    fn test_commit_hook_runs_once() -> Result<()> {
        let remote = MemoryRemote::new();
        remote.before_next_commit(|r| {
            let _ = r.seed_file("late.json", "theirs");
        });

        let mut changes = FileChanges::new();
        changes.insert("mine.json".to_string(), Some("ours".to_string()));
        remote.commit_multiple_files(&changes, "first", None)?;
        assert_eq!(remote.file("late.json").as_deref(), Some("theirs"));

        remote.seed_file("late.json", "again")?;
        remote.commit_multiple_files(&changes, "second", None)?;
        assert_eq!(remote.file("late.json").as_deref(), Some("again"));
        Ok(())
    }

    #[test]
    fn test_delete_directory() -> Result<()> {
        let remote = MemoryRemote::new();
        remote.seed_file("d/one.json", "1")?;
        remote.seed_file("d/sub/two.json", "2")?;
        remote.seed_file("keep.json", "3")?;
        remote.delete_directory("d", "remove d")?;
        assert_eq!(remote.paths(), vec!["keep.json".to_string()]);
        Ok(())
    }

    #[test]
    fn test_secret_store_overwrites() -> Result<()> {
        let store = MemorySecretStore::new();
        store.seed("apisync/dev", &[("A", "1"), ("B", "2")]);

        let mut replacement = BTreeMap::new();
        replacement.insert("C".to_string(), "3".to_string());
        store.put_secrets("apisync/dev", &replacement)?;

        assert_eq!(store.get_secrets("apisync/dev")?, Some(replacement));
        assert_eq!(store.list_secrets(Some("apisync"))?, vec!["dev".to_string()]);
        assert!(store.get_secrets("apisync/prod")?.is_none());

        store.delete_secrets("apisync/dev")?;
        assert!(store.list_secrets(Some("apisync"))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_unavailable_connection() {
        let remote = MemoryRemote::new();
        remote.set_unavailable(true);
        assert!(!remote.test_connection());
        assert!(remote.list_files("").is_err());
    }
}
