//! Remote file layout of a collection.
//!
//! ```text
//! {base}/collections/{collection_id}/collection.json
//! {base}/collections/{collection_id}/requests/{request_id}.json
//! ```
//!
//! Encoding is deterministic so an unchanged collection always produces
//! byte-identical files.

use super::provider::{join_path, FileContent};
use crate::error::{Result, SyncError};
use crate::workspace::{ApiRequest, Collection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const COLLECTIONS_DIR: &str = "collections";
pub const COLLECTION_FILE: &str = "collection.json";
pub const REQUESTS_DIR: &str = "requests";

/// Contents of `collection.json`.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionManifest {
    id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    request_order: Vec<String>,
}

/// `{base}/collections`
pub fn collections_root(base_path: &str) -> String {
    join_path(base_path, COLLECTIONS_DIR)
}

/// `{base}/collections/{id}`
pub fn collection_dir(base_path: &str, collection_id: &str) -> String {
    join_path(&collections_root(base_path), collection_id)
}

/// Check that an id can name a single path segment.
///
/// The id becomes a directory or file name on the remote, so separators and
/// dot segments would move the file somewhere decoding never looks.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        "is empty"
    } else if id.contains('/') || id.contains('\\') {
        "contains a path separator"
    } else if id.starts_with('.') {
        "starts with '.'"
    } else if id.chars().any(char::is_control) {
        "contains control characters"
    } else {
        return Ok(());
    };
    Err(SyncError::Invalid(format!("{} id {:?}: {}", kind, id, reason)))
}

/// Collection id owning `path`, if `path` lies below the collections root.
pub fn collection_id_of<'a>(root: &str, path: &'a str) -> Option<&'a str> {
    let root = root.trim_matches('/');
    let rest = if root.is_empty() {
        path
    } else {
        path.strip_prefix(root)?.strip_prefix('/')?
    };
    rest.split('/').next().filter(|id| !id.is_empty() && rest.contains('/'))
}

/// Serialize a collection to its files, keyed by full remote path.
pub fn encode_collection(base_path: &str, collection: &Collection) -> Result<BTreeMap<String, String>> {
    validate_id("collection", &collection.id)?;
    for request in &collection.requests {
        validate_id("request", &request.id)?;
    }

    let dir = collection_dir(base_path, &collection.id);
    let mut files = BTreeMap::new();

    let manifest = CollectionManifest {
        id: collection.id.clone(),
        name: collection.name.clone(),
        description: collection.description.clone(),
        request_order: collection.requests.iter().map(|r| r.id.clone()).collect(),
    };
    files.insert(join_path(&dir, COLLECTION_FILE), to_json(&manifest)?);

    let requests_dir = join_path(&dir, REQUESTS_DIR);
    for request in &collection.requests {
        files.insert(
            join_path(&requests_dir, &format!("{}.json", request.id)),
            to_json(request)?,
        );
    }

    Ok(files)
}

/// Rebuild a collection from the files under its directory.
pub fn decode_collection(dir: &str, files: &[FileContent]) -> Result<Collection> {
    let manifest_path = join_path(dir, COLLECTION_FILE);
    let manifest_file = files
        .iter()
        .find(|f| f.path == manifest_path)
        .ok_or_else(|| SyncError::Decode(format!("{} is missing", manifest_path)))?;
    let manifest: CollectionManifest = serde_json::from_str(&manifest_file.content)
        .map_err(|e| SyncError::Decode(format!("{}: {}", manifest_path, e)))?;

    let requests_dir = join_path(dir, REQUESTS_DIR);
    let mut requests: BTreeMap<String, ApiRequest> = BTreeMap::new();
    for file in files {
        let Some(name) = file
            .path
            .strip_prefix(requests_dir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            continue;
        };
        if name.contains('/') {
            return Err(SyncError::Decode(format!(
                "{}: requests must sit directly in {}",
                file.path, requests_dir
            )));
        }
        if !name.ends_with(".json") {
            continue;
        }
        let request: ApiRequest = serde_json::from_str(&file.content)
            .map_err(|e| SyncError::Decode(format!("{}: {}", file.path, e)))?;
        requests.insert(request.id.clone(), request);
    }

    // Manifest order first, then anything the manifest does not mention, by id.
    let mut ordered = Vec::with_capacity(requests.len());
    for id in &manifest.request_order {
        if let Some(request) = requests.remove(id) {
            ordered.push(request);
        }
    }
    ordered.extend(requests.into_values());

    Ok(Collection {
        id: manifest.id,
        name: manifest.name,
        description: manifest.description,
        requests: ordered,
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    Ok(json)
}
