//! Error types for the sync engine.
//!
//! Conflicts are a distinguished variant rather than a generic failure so the
//! orchestrators can route them into `SyncResult.conflicts` instead of
//! `SyncResult.errors`.

use thiserror::Error;

/// Result alias used by providers and sync services.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by providers and sync services.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local and remote content diverged, or an optimistic lock (sha) was stale.
    #[error("{}", conflict_message(paths))]
    Conflict { paths: Vec<String> },

    /// The path does not exist on the remote.
    #[error("Not found: {0}")]
    NotFound(String),

    /// `create` targeted a path that already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The remote could not be reached or refused the credentials.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The backend is missing required configuration.
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Another call on the same service is still in flight.
    #[error("{0} sync already in progress")]
    Busy(&'static str),

    /// The remote answered with an unexpected status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Local data cannot be written to the remote as-is.
    #[error("Invalid {0}")]
    Invalid(String),

    /// Remote content could not be turned into workspace data.
    #[error("Cannot decode remote content: {0}")]
    Decode(String),

    /// Failure in a local collaborator (workspace store, config).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Build a conflict signal for the given paths.
    pub fn conflict<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Conflict {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::RemoteUnavailable(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Message for a conflict: the base names of the conflicting paths.
fn conflict_message(paths: &[String]) -> String {
    let names: Vec<&str> = paths
        .iter()
        .map(|p| p.rsplit('/').next().unwrap_or(p.as_str()))
        .collect();
    format!("Conflict detected in: {}", names.join(", "))
}
