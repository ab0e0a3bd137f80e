//! GitHub Provider - Remote file tree backed by the GitHub REST API.
//!
//! Single-file reads and writes go through the contents API, which enforces
//! sha-based optimistic locking. Multi-file writes use the git data API
//! (blobs -> tree -> commit -> ref update) so a batch lands as exactly one commit;
//! the ref update is the only visible step and is not forced.

use super::provider::{
    is_under, CommitInfo, EntryKind, FileChanges, FileContent, RemoteFileProvider, TreeEntry,
};
use crate::config::RemoteConfig;
use crate::error::{Result, SyncError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = "apisync";
const FILE_MODE: &str = "100644";

/// GitHub file provider for one repository branch.
pub struct GitHubProvider {
    client: Client,
    api_base: String,
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShaObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaObject,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    tree: ShaObject,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: ShaObject,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl GitHubProvider {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: "https://api.github.com".to_string(),
            owner: owner.into(),
            repo: repo.into(),
            branch: "main".to_string(),
            token,
        }
    }

    /// Build from the `[remote]` config section and a resolved token.
    pub fn from_config(config: &RemoteConfig, token: Option<String>) -> Self {
        Self::new(
            config.owner.clone().unwrap_or_default(),
            config.repo.clone().unwrap_or_default(),
            token,
        )
        .with_branch(config.branch.clone())
        .with_api_base(config.api_base.clone())
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Override the API root (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            self.owner,
            self.repo,
            suffix.trim_start_matches('/')
        )
    }

    fn contents_url(&self, path: &str) -> String {
        self.repo_url(&format!("contents/{}", path.trim_matches('/')))
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| SyncError::NotConfigured("GitHub token".to_string()))?;
        Ok(self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28"))
    }

    fn require_head(&self) -> Result<String> {
        self.head_commit()?.ok_or_else(|| {
            SyncError::NotConfigured(format!(
                "branch '{}' of {}/{} has no commits; initialise the repository first",
                self.branch, self.owner, self.repo
            ))
        })
    }

    fn tree_items(&self, commit_sha: &str, dir: &str) -> Result<Vec<TreeItem>> {
        let url = self.repo_url(&format!("git/trees/{}", commit_sha));
        let response = self
            .request(Method::GET, &url)?
            .query(&[("recursive", "1")])
            .send()?;
        let tree: TreeResponse = check(response, dir)?.json()?;
        // A partial listing would make missing files look deleted.
        if tree.truncated {
            return Err(SyncError::RemoteUnavailable(format!(
                "tree listing for {} was truncated by GitHub",
                commit_sha
            )));
        }

        let dir = dir.trim_matches('/');
        let items: Vec<TreeItem> = tree
            .tree
            .into_iter()
            .filter(|item| is_under(&item.path, dir) && item.path != dir)
            .filter(|item| item.kind == "blob" || item.kind == "tree")
            .collect();
        if items.is_empty() && !dir.is_empty() {
            return Err(SyncError::NotFound(dir.to_string()));
        }
        Ok(items)
    }

    fn blob(&self, sha: &str, path: &str) -> Result<String> {
        let url = self.repo_url(&format!("git/blobs/{}", sha));
        let response = self.request(Method::GET, &url)?.send()?;
        let blob: BlobResponse = check(response, path)?.json()?;
        decode_base64(&blob.content, path)
    }

    fn entry_content(&self, entry: &ContentEntry) -> Result<String> {
        match (entry.encoding.as_deref(), entry.content.as_deref()) {
            (Some("base64"), Some(content)) => decode_base64(content, &entry.path),
            // Files over 1 MB come back without inline content
            _ => self.blob(&entry.sha, &entry.path),
        }
    }

    fn create_blob(&self, path: &str, content: &str) -> Result<String> {
        let response = self
            .request(Method::POST, &self.repo_url("git/blobs"))?
            .json(&json!({ "content": content, "encoding": "utf-8" }))
            .send()?;
        let blob: ShaObject = check(response, path)?.json()?;
        Ok(blob.sha)
    }

    fn write_contents(&self, path: &str, body: serde_json::Value) -> Result<Response> {
        let response = self
            .request(Method::PUT, &self.contents_url(path))?
            .json(&body)
            .send()?;
        Ok(response)
    }
}

impl RemoteFileProvider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    fn is_configured(&self) -> bool {
        self.token.is_some() && !self.owner.is_empty() && !self.repo.is_empty()
    }

    fn list_files(&self, path: &str) -> Result<Vec<FileContent>> {
        let response = self
            .request(Method::GET, &self.contents_url(path))?
            .query(&[("ref", self.branch.as_str())])
            .send()?;
        let entries: Vec<ContentEntry> = check(response, path)?.json()?;
        let head = self.head_commit()?;

        let mut files = Vec::new();
        for entry in entries.iter().filter(|e| e.kind == "file") {
            files.push(FileContent {
                path: entry.path.clone(),
                content: self.blob(&entry.sha, &entry.path)?,
                sha: Some(entry.sha.clone()),
                commit_sha: head.clone(),
            });
        }
        Ok(files)
    }

    fn list_directory_recursive(&self, path: &str) -> Result<Vec<TreeEntry>> {
        let head = self
            .head_commit()?
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;

        Ok(self
            .tree_items(&head, path)?
            .into_iter()
            .map(|item| TreeEntry {
                kind: if item.kind == "tree" {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                },
                path: item.path,
                sha: item.sha,
            })
            .collect())
    }

    fn get_directory_tree(&self, path: &str) -> Result<Vec<FileContent>> {
        let head = self
            .head_commit()?
            .ok_or_else(|| SyncError::NotFound(path.to_string()))?;

        let mut files = Vec::new();
        for item in self.tree_items(&head, path)? {
            if item.kind != "blob" {
                continue;
            }
            let content = self.blob(&item.sha, &item.path)?;
            files.push(FileContent {
                path: item.path,
                content,
                sha: Some(item.sha),
                commit_sha: Some(head.clone()),
            });
        }
        debug!("[GitHub] Fetched {} file(s) under {}", files.len(), path);
        Ok(files)
    }

    fn get_file(&self, path: &str) -> Result<Option<FileContent>> {
        let response = self
            .request(Method::GET, &self.contents_url(path))?
            .query(&[("ref", self.branch.as_str())])
            .send()?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let value: serde_json::Value = check(response, path)?.json()?;
        if value.is_array() {
            return Err(SyncError::Decode(format!("{} is a directory", path)));
        }
        let entry: ContentEntry = serde_json::from_value(value)?;
        Ok(Some(FileContent {
            content: self.entry_content(&entry)?,
            path: entry.path,
            sha: Some(entry.sha),
            commit_sha: None,
        }))
    }

    fn create_file(&self, path: &str, content: &str, message: &str) -> Result<String> {
        let response = self.write_contents(
            path,
            json!({
                "message": message,
                "content": STANDARD.encode(content),
                "branch": self.branch,
            }),
        )?;
        // Without a sha GitHub answers 422 when the file exists
        if response.status().as_u16() == 422 {
            return Err(SyncError::AlreadyExists(path.to_string()));
        }
        let written: WriteResponse = check(response, path)?.json()?;
        Ok(written.content.sha)
    }

    fn update_file(&self, path: &str, content: &str, sha: &str, message: &str) -> Result<String> {
        let response = self.write_contents(
            path,
            json!({
                "message": message,
                "content": STANDARD.encode(content),
                "sha": sha,
                "branch": self.branch,
            }),
        )?;
        if response.status().as_u16() == 422 {
            return Err(SyncError::conflict([path]));
        }
        let written: WriteResponse = check(response, path)?.json()?;
        Ok(written.content.sha)
    }

    fn delete_file(&self, path: &str, sha: &str, message: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &self.contents_url(path))?
            .json(&json!({
                "message": message,
                "sha": sha,
                "branch": self.branch,
            }))
            .send()?;
        if response.status().as_u16() == 422 {
            return Err(SyncError::conflict([path]));
        }
        check(response, path)?;
        Ok(())
    }

    fn delete_directory(&self, path: &str, message: &str) -> Result<()> {
        let changes: FileChanges = self
            .list_directory_recursive(path)?
            .into_iter()
            .filter(|e| e.is_file())
            .map(|e| (e.path, None))
            .collect();
        if changes.is_empty() {
            return Err(SyncError::NotFound(path.to_string()));
        }
        self.commit_multiple_files(&changes, message, None)?;
        Ok(())
    }

    /// Head commit of the branch, `None` when the branch has no commits yet.
    fn head_commit(&self) -> Result<Option<String>> {
        let url = self.repo_url(&format!("git/ref/heads/{}", self.branch));
        let response = self.request(Method::GET, &url)?.send()?;
        // 409: "Git Repository is empty"
        if matches!(response.status().as_u16(), 404 | 409) {
            return Ok(None);
        }
        let head: RefResponse = check(response, &self.branch)?.json()?;
        Ok(Some(head.object.sha))
    }

    fn commit_multiple_files(
        &self,
        changes: &FileChanges,
        message: &str,
        expected_head: Option<&str>,
    ) -> Result<CommitInfo> {
        let paths: Vec<&str> = changes.keys().map(|p| p.as_str()).collect();
        let head = match expected_head {
            Some(sha) => sha.to_string(),
            None => self.require_head()?,
        };

        let response = self
            .request(Method::GET, &self.repo_url(&format!("git/commits/{}", head)))?
            .send()?;
        let base: CommitResponse = check(response, &self.branch)?.json()?;

        // Blobs stay unreferenced until the ref moves.
        let mut file_shas = BTreeMap::new();
        let mut tree = Vec::with_capacity(changes.len());
        for (path, change) in changes {
            let sha = match change {
                Some(content) => {
                    let sha = self.create_blob(path, content)?;
                    file_shas.insert(path.clone(), sha.clone());
                    serde_json::Value::String(sha)
                }
                None => serde_json::Value::Null,
            };
            tree.push(json!({
                "path": path,
                "mode": FILE_MODE,
                "type": "blob",
                "sha": sha,
            }));
        }

        let response = self
            .request(Method::POST, &self.repo_url("git/trees"))?
            .json(&json!({ "base_tree": base.tree.sha, "tree": tree }))
            .send()?;
        let new_tree: ShaObject = check(response, &self.branch)?.json()?;

        let response = self
            .request(Method::POST, &self.repo_url("git/commits"))?
            .json(&json!({
                "message": message,
                "tree": new_tree.sha,
                "parents": [head],
            }))
            .send()?;
        let commit: ShaObject = check(response, &self.branch)?.json()?;

        // Fast-forward only: a moved branch means someone else committed first.
        let response = self
            .request(
                Method::PATCH,
                &self.repo_url(&format!("git/refs/heads/{}", self.branch)),
            )?
            .json(&json!({ "sha": commit.sha, "force": false }))
            .send()?;
        if response.status().as_u16() == 422 {
            return Err(SyncError::conflict(paths));
        }
        check(response, &self.branch)?;

        info!(
            "[GitHub] Committed {} file(s) to {}/{}@{}: {}",
            changes.len(),
            self.owner,
            self.repo,
            self.branch,
            commit.sha
        );
        Ok(CommitInfo {
            sha: commit.sha,
            file_shas,
        })
    }

    fn test_connection(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        let url = format!("{}/repos/{}/{}", self.api_base, self.owner, self.repo);
        match self.request(Method::GET, &url).and_then(|r| Ok(r.send()?)) {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("[GitHub] Connection test failed: {}", e);
                false
            }
        }
    }
}

/// Map a non-success response to a `SyncError`.
fn check(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.message)
        .unwrap_or(text);

    Err(match status.as_u16() {
        401 => SyncError::RemoteUnavailable(format!("GitHub rejected the token: {}", message)),
        404 => SyncError::NotFound(path.to_string()),
        409 => SyncError::conflict([path]),
        code => SyncError::Api {
            status: code,
            message,
        },
    })
}

fn decode_base64(content: &str, path: &str) -> Result<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| SyncError::Decode(format!("{}: {}", path, e)))?;
    String::from_utf8(bytes).map_err(|e| SyncError::Decode(format!("{}: {}", path, e)))
}
