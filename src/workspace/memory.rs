use super::model::{Collection, CollectionRecord, Environment, SyncState};
use super::WorkspaceStore;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Workspace held in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryWorkspace {
    collections: Mutex<BTreeMap<String, CollectionRecord>>,
    environments: Mutex<BTreeMap<String, Environment>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection that was last synced with the given remote state.
    pub fn insert_synced(&self, collection: Collection, state: SyncState) -> Result<()> {
        self.upsert_collection(&collection, &state)
    }

    fn collections(&self) -> Result<MutexGuard<'_, BTreeMap<String, CollectionRecord>>> {
        self.collections
            .lock()
            .map_err(|e| anyhow!("Workspace lock poisoned: {}", e))
    }

    fn environments(&self) -> Result<MutexGuard<'_, BTreeMap<String, Environment>>> {
        self.environments
            .lock()
            .map_err(|e| anyhow!("Workspace lock poisoned: {}", e))
    }
}

impl WorkspaceStore for MemoryWorkspace {
    fn list_collections(&self) -> Result<Vec<CollectionRecord>> {
        Ok(self.collections()?.values().cloned().collect())
    }

    fn get_collection(&self, id: &str) -> Result<Option<CollectionRecord>> {
        Ok(self.collections()?.get(id).cloned())
    }

    fn upsert_collection(&self, collection: &Collection, state: &SyncState) -> Result<()> {
        self.collections()?.insert(
            collection.id.clone(),
            CollectionRecord {
                collection: collection.clone(),
                sync: state.clone(),
            },
        );
        Ok(())
    }

    fn update_sync_state(&self, id: &str, state: &SyncState) -> Result<()> {
        let mut collections = self.collections()?;
        let record = collections
            .get_mut(id)
            .ok_or_else(|| anyhow!("Unknown collection: {}", id))?;
        record.sync = state.clone();
        Ok(())
    }

    fn save_local_edit(&self, collection: &Collection) -> Result<()> {
        let mut collections = self.collections()?;
        let sync = collections
            .get(&collection.id)
            .map(|r| r.sync.clone())
            .unwrap_or_default();
        collections.insert(
            collection.id.clone(),
            CollectionRecord {
                collection: collection.clone(),
                sync: SyncState {
                    locally_modified: true,
                    ..sync
                },
            },
        );
        Ok(())
    }

    fn list_environments(&self) -> Result<Vec<Environment>> {
        let mut envs: Vec<Environment> = self.environments()?.values().cloned().collect();
        envs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(envs)
    }

    fn upsert_environment(&self, environment: &Environment) -> Result<()> {
        self.environments()?
            .insert(environment.id.clone(), environment.clone());
        Ok(())
    }
}
