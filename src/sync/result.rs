//! Result records returned by the sync services.

use serde::Serialize;

/// A collection that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    pub collection_id: String,
    pub collection_name: String,
}

/// Summary of one file sync call.
///
/// Conflicts and errors can coexist with non-zero counts: one call may
/// partially succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub pulled: usize,
    pub pushed: usize,
    pub conflicts: Vec<ConflictEntry>,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        !self.has_conflicts() && !self.has_errors()
    }

    /// Fold a later call's result into this one. A collection reported as a
    /// conflict by both calls is listed once.
    pub fn merge(&mut self, other: SyncResult) {
        self.pulled += other.pulled;
        self.pushed += other.pushed;
        for conflict in other.conflicts {
            if !self
                .conflicts
                .iter()
                .any(|c| c.collection_id == conflict.collection_id)
            {
                self.conflicts.push(conflict);
            }
        }
        self.errors.extend(other.errors);
    }
}

/// Summary of one secret sync call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VaultSyncSummary {
    /// Local environments created from remote secrets.
    pub created: usize,
    /// Local environments whose variables were overwritten.
    pub updated: usize,
    /// Environments written to the secret store.
    pub pushed: usize,
    pub errors: Vec<String>,
}

impl VaultSyncSummary {
    pub fn merge(&mut self, other: VaultSyncSummary) {
        self.created += other.created;
        self.updated += other.updated;
        self.pushed += other.pushed;
        self.errors.extend(other.errors);
    }
}
