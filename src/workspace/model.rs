//! Workspace data model: collections of API requests and environments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single API request inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub id: String,
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// A named group of API requests. The unit of file sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub requests: Vec<ApiRequest>,
}

impl Collection {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            requests: Vec::new(),
        }
    }

    /// Builder-style helper, mostly for tests and imports.
    pub fn with_request(mut self, request: ApiRequest) -> Self {
        self.requests.push(request);
        self
    }
}

/// Bookkeeping for one collection relative to the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Remote sha of every file as of the last sync, keyed by full remote path.
    #[serde(default)]
    pub file_shas: BTreeMap<String, String>,
    /// Commit that produced the last synced state.
    #[serde(default)]
    pub commit_sha: Option<String>,
    /// Set by local edits, cleared by a successful pull or push.
    #[serde(default)]
    pub locally_modified: bool,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// State right after a successful exchange with the remote.
    pub fn synced(file_shas: BTreeMap<String, String>, commit_sha: Option<String>) -> Self {
        Self {
            file_shas,
            commit_sha,
            locally_modified: false,
            last_synced_at: Some(Utc::now()),
        }
    }

    pub fn has_synced(&self) -> bool {
        self.last_synced_at.is_some()
    }
}

/// A collection as held by the local store, with its sync marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRecord {
    pub collection: Collection,
    pub sync: SyncState,
}

/// A named set of variables, synced to the secret store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Environment {
    /// New environment with a generated id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }
}
