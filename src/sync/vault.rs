//! VaultSyncService - Syncs environment variables with a secret store.
//!
//! Secret stores overwrite in place and offer no optimistic lock, so there is
//! no conflict detection here: the last writer wins. This is a weaker
//! guarantee than the file sync and is surfaced to users as such.

use super::guard::BusyFlag;
use super::provider::{join_path, SecretStoreProvider};
use super::result::VaultSyncSummary;
use crate::config::{SettingsStore, VAULT_AUTO_SYNC};
use crate::error::Result;
use crate::workspace::{Environment, WorkspaceStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates pull/push of environments against a `SecretStoreProvider`.
///
/// An environment named `dev` lives at `{base_path}/dev`.
pub struct VaultSyncService {
    provider: Box<dyn SecretStoreProvider>,
    store: Arc<dyn WorkspaceStore>,
    base_path: String,
    busy: BusyFlag,
}

impl VaultSyncService {
    pub fn new(
        provider: Box<dyn SecretStoreProvider>,
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

    pub fn is_configured(&self) -> bool {
        self.provider.is_configured()
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn test_connection(&self) -> bool {
        self.is_configured() && self.provider.test_connection()
    }

    /// Fetch every secret under the base path into local environments.
    pub fn pull_all(&self) -> Result<VaultSyncSummary> {
        if !self.is_configured() {
            debug!("[VaultSync] Secret store not configured, skipping pull");
            return Ok(VaultSyncSummary::default());
        }
        let _guard = self.busy.acquire("Vault")?;
        info!("[VaultSync] Pulling secrets from {}...", self.provider.name());

        let names = self.provider.list_secrets(Some(&self.base_path))?;
        let mut local = self.store.list_environments()?;
        let mut summary = VaultSyncSummary::default();

        for name in names {
            let path = join_path(&self.base_path, &name);
            let secrets = match self.provider.get_secrets(&path) {
                Ok(Some(secrets)) => secrets,
                // Deleted between list and get
                Ok(None) => continue,
                Err(e) => {
                    warn!("[VaultSync] Cannot read {}: {}", path, e);
                    summary.errors.push(format!("{}: {}", name, e));
                    continue;
                }
            };

            let outcome = match local.iter().position(|env| env.name == name) {
                Some(idx) if local[idx].variables == secrets => continue,
                Some(idx) => {
                    local[idx].variables = secrets;
                    self.store
                        .upsert_environment(&local[idx])
                        .map(|_| Upsert::Updated)
                }
                None => {
                    let mut env = Environment::new(name.clone());
                    env.variables = secrets;
                    let stored = self.store.upsert_environment(&env);
                    local.push(env);
                    stored.map(|_| Upsert::Created)
                }
            };

            match outcome {
                Ok(Upsert::Created) => summary.created += 1,
                Ok(Upsert::Updated) => summary.updated += 1,
                Err(e) => summary.errors.push(format!("{}: {}", name, e)),
            }
        }

        info!(
            "[VaultSync] Pull complete: created={}, updated={}, errors={}",
            summary.created,
            summary.updated,
            summary.errors.len()
        );
        Ok(summary)
    }

    /// Write every local environment to the secret store, overwriting.
    pub fn push_all(&self) -> Result<VaultSyncSummary> {
        if !self.is_configured() {
            debug!("[VaultSync] Secret store not configured, skipping push");
            return Ok(VaultSyncSummary::default());
        }
        let _guard = self.busy.acquire("Vault")?;

        let environments = self.store.list_environments()?;
        info!(
            "[VaultSync] Pushing {} environment(s) to {}...",
            environments.len(),
            self.provider.name()
        );

        let mut summary = VaultSyncSummary::default();
        for env in &environments {
            if env.name.is_empty() || env.name.contains('/') {
                summary
                    .errors
                    .push(format!("{}: invalid environment name", env.name));
                continue;
            }
            let path = join_path(&self.base_path, &env.name);
            match self.provider.put_secrets(&path, &env.variables) {
                Ok(()) => summary.pushed += 1,
                Err(e) => {
                    warn!("[VaultSync] Cannot write {}: {}", path, e);
                    summary.errors.push(format!("{}: {}", env.name, e));
                }
            }
        }

        info!(
            "[VaultSync] Push complete: pushed={}, errors={}",
            summary.pushed,
            summary.errors.len()
        );
        Ok(summary)
    }

    /// Pull only if `vault.auto_sync` is on.
    pub fn auto_pull(&self, settings: &dyn SettingsStore) -> Result<Option<VaultSyncSummary>> {
        if !settings.get_setting(VAULT_AUTO_SYNC, false) || !self.is_configured() {
            return Ok(None);
        }
        self.pull_all().map(Some)
    }

    /// Push only if `vault.auto_sync` is on.
    pub fn auto_push(&self, settings: &dyn SettingsStore) -> Result<Option<VaultSyncSummary>> {
        if !settings.get_setting(VAULT_AUTO_SYNC, false) || !self.is_configured() {
            return Ok(None);
        }
        self.push_all().map(Some)
    }
}

enum Upsert {
    Created,
    Updated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::memory::MemorySecretStore;
    use crate::workspace::MemoryWorkspace;
    use std::collections::HashMap;

    fn service(secrets: &MemorySecretStore, store: &Arc<MemoryWorkspace>) -> VaultSyncService {
        VaultSyncService::new(Box::new(secrets.clone()), store.clone(), "apisync")
    }

    #[test]
    fn test_pull_creates_and_updates() -> anyhow::Result<()> {
        let secrets = MemorySecretStore::new();
        secrets.seed("apisync/dev", &[("TOKEN", "new")]);
        secrets.seed("apisync/prod", &[("TOKEN", "p")]);

        let store = Arc::new(MemoryWorkspace::new());
        store.upsert_environment(&Environment::new("dev").with_variable("TOKEN", "old"))?;

        let summary = service(&secrets, &store).pull_all()?;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.updated, 1);
        assert!(summary.errors.is_empty());

        let envs = store.list_environments()?;
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[0].name, "dev");
        assert_eq!(envs[0].variables["TOKEN"], "new");
        Ok(())
    }

    #[test]
    fn test_pull_twice_is_quiet() -> anyhow::Result<()> {
        let secrets = MemorySecretStore::new();
        secrets.seed("apisync/dev", &[("A", "1")]);
        let store = Arc::new(MemoryWorkspace::new());
        let svc = service(&secrets, &store);

        svc.pull_all()?;
        let second = svc.pull_all()?;
        assert_eq!(second, VaultSyncSummary::default());
        Ok(())
    }

    #[test]
    fn test_push_overwrites_remote() -> anyhow::Result<()> {
        let secrets = MemorySecretStore::new();
        secrets.seed("apisync/dev", &[("STALE", "x")]);
        let store = Arc::new(MemoryWorkspace::new());
        store.upsert_environment(&Environment::new("dev").with_variable("FRESH", "y"))?;

        let summary = service(&secrets, &store).push_all()?;
        assert_eq!(summary.pushed, 1);

        let stored = secrets.secret("apisync/dev").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored["FRESH"], "y");
        Ok(())
    }

    #[test]
    fn test_item_failures_do_not_abort() -> anyhow::Result<()> {
        let secrets = MemorySecretStore::new();
        secrets.seed("apisync/dev", &[("A", "1")]);
        secrets.seed("apisync/qa", &[("B", "2")]);
        secrets.fail_path("apisync/qa", "permission denied");
        let store = Arc::new(MemoryWorkspace::new());

        let summary = service(&secrets, &store).pull_all()?;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("qa:"));
        Ok(())
    }

    #[test]
    fn test_auto_sync_disabled_makes_no_calls() -> anyhow::Result<()> {
        let secrets = MemorySecretStore::new();
        let store = Arc::new(MemoryWorkspace::new());
        let settings: HashMap<String, bool> = HashMap::new();

        let svc = service(&secrets, &store);
        assert!(svc.auto_pull(&settings)?.is_none());
        assert!(svc.auto_push(&settings)?.is_none());
        assert_eq!(secrets.call_count(), 0);
        Ok(())
    }
}
