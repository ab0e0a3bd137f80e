//! Notifications - User-facing summaries of sync outcomes.
//!
//! The sync services only produce data. Turning a result into something a
//! person reads is done here, and delivery is left to a `NotificationSink`.

use crate::sync::{SyncResult, VaultSyncSummary};
use serde::Serialize;
use tracing::{error, info, warn};

/// How many error lines a notification body repeats verbatim.
const MAX_LISTED_ERRORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: Level,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(level: Level, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Summarise a file sync.
    ///
    /// Conflicts are listed by collection name so the user knows what to
    /// resolve. Errors outrank conflicts when choosing the level.
    pub fn from_sync_result(result: &SyncResult) -> Self {
        let mut lines = vec![format!(
            "Pulled {} collection(s), pushed {} collection(s).",
            result.pulled, result.pushed
        )];

        if result.has_conflicts() {
            let names: Vec<&str> = result
                .conflicts
                .iter()
                .map(|c| c.collection_name.as_str())
                .collect();
            lines.push(format!("Conflicts: {}", names.join(", ")));
        }
        push_errors(&mut lines, &result.errors);

        let (level, title) = if result.has_errors() {
            (Level::Error, "Sync finished with errors")
        } else if result.has_conflicts() {
            (Level::Warning, "Sync conflicts need attention")
        } else {
            (Level::Info, "Sync complete")
        };
        Self::new(level, title, lines.join("\n"))
    }

    /// Summarise a secret sync.
    pub fn from_vault_summary(summary: &VaultSyncSummary) -> Self {
        let mut lines = vec![format!(
            "Created {}, updated {}, pushed {} environment(s).",
            summary.created, summary.updated, summary.pushed
        )];
        push_errors(&mut lines, &summary.errors);

        if summary.errors.is_empty() {
            Self::new(Level::Info, "Vault sync complete", lines.join("\n"))
        } else {
            Self::new(Level::Error, "Vault sync finished with errors", lines.join("\n"))
        }
    }
}

fn push_errors(lines: &mut Vec<String>, errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    lines.push(format!("{} error(s):", errors.len()));
    lines.extend(errors.iter().take(MAX_LISTED_ERRORS).map(|e| format!("- {}", e)));
    if errors.len() > MAX_LISTED_ERRORS {
        lines.push(format!("- ... and {} more", errors.len() - MAX_LISTED_ERRORS));
    }
}

/// Where notifications go: a toast in the desktop app, stderr in the CLI.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Sink that writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, n: &Notification) {
        match n.level {
            Level::Info => info!("[Notify] {}: {}", n.title, n.body),
            Level::Warning => warn!("[Notify] {}: {}", n.title, n.body),
            Level::Error => error!("[Notify] {}: {}", n.title, n.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ConflictEntry;

    #[test]
    fn test_clean_result_is_info() {
        let result = SyncResult {
            pulled: 2,
            ..Default::default()
        };
        let n = Notification::from_sync_result(&result);
        assert_eq!(n.level, Level::Info);
        assert!(n.body.contains("Pulled 2"));
    }

    #[test]
    fn test_conflicts_listed_by_name() {
        let result = SyncResult {
            conflicts: vec![ConflictEntry {
                collection_id: "c-1".to_string(),
                collection_name: "Billing API".to_string(),
            }],
            ..Default::default()
        };
        let n = Notification::from_sync_result(&result);
        assert_eq!(n.level, Level::Warning);
        assert!(n.body.contains("Conflicts: Billing API"));
    }

    #[test]
    fn test_errors_are_truncated() {
        let result = SyncResult {
            errors: (1..=5).map(|i| format!("failure {}", i)).collect(),
            ..Default::default()
        };
        let n = Notification::from_sync_result(&result);
        assert_eq!(n.level, Level::Error);
        assert!(n.body.contains("5 error(s)"));
        assert!(n.body.contains("failure 3"));
        assert!(!n.body.contains("failure 4"));
        assert!(n.body.contains("and 2 more"));
    }

    #[test]
    fn test_vault_summary() {
        let summary = VaultSyncSummary {
            created: 1,
            updated: 2,
            ..Default::default()
        };
        let n = Notification::from_vault_summary(&summary);
        assert_eq!(n.level, Level::Info);
        assert!(n.body.starts_with("Created 1, updated 2"));
    }
}
