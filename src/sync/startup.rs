//! Auto-sync on application start.
//!
//! Runs pull then push for every service whose auto-sync toggle is on. A
//! failing service never blocks startup: its error becomes a warning.

use super::remote::RemoteSyncService;
use super::result::{SyncResult, VaultSyncSummary};
use super::vault::VaultSyncService;
use crate::config::SettingsStore;
use crate::error::Result;
use crate::notify::{Level, Notification, NotificationSink};
use tracing::{info, warn};

/// What happened during startup sync. `None` means the service did not run.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub remote: Option<SyncResult>,
    pub vault: Option<VaultSyncSummary>,
    pub warnings: Vec<String>,
}

pub fn run_startup_sync(
    settings: &dyn SettingsStore,
    remote: Option<&RemoteSyncService>,
    vault: Option<&VaultSyncService>,
    sink: &dyn NotificationSink,
) -> StartupReport {
    let mut report = StartupReport::default();

    if let Some(service) = remote {
        report.remote = pull_then_push(
            "Remote",
            || service.auto_pull(settings),
            || service.auto_push(settings),
            SyncResult::merge,
            &mut report.warnings,
        );
        if let Some(result) = report.remote.as_ref().filter(|r| worth_reporting(r)) {
            sink.notify(&Notification::from_sync_result(result));
        }
    }

    if let Some(service) = vault {
        report.vault = pull_then_push(
            "Vault",
            || service.auto_pull(settings),
            || service.auto_push(settings),
            VaultSyncSummary::merge,
            &mut report.warnings,
        );
        if let Some(summary) = report.vault.as_ref().filter(|s| !s.errors.is_empty()) {
            sink.notify(&Notification::from_vault_summary(summary));
        }
    }

    for warning in &report.warnings {
        sink.notify(&Notification::new(
            Level::Warning,
            "Startup sync failed",
            warning.clone(),
        ));
    }

    info!(
        "[Startup] Auto-sync done: remote={}, vault={}, warnings={}",
        report.remote.is_some(),
        report.vault.is_some(),
        report.warnings.len()
    );
    report
}

/// Pull failures do not stop the push: local edits still deserve a chance to
/// reach the remote.
fn pull_then_push<T>(
    service: &str,
    pull: impl FnOnce() -> Result<Option<T>>,
    push: impl FnOnce() -> Result<Option<T>>,
    merge: fn(&mut T, T),
    warnings: &mut Vec<String>,
) -> Option<T> {
    let mut outcome = match pull() {
        Ok(None) => return None,
        Ok(Some(pulled)) => Some(pulled),
        Err(e) => {
            warn!("[Startup] {} pull failed (non-fatal): {}", service, e);
            warnings.push(format!("{} pull failed: {}", service, e));
            None
        }
    };

    match push() {
        Ok(Some(pushed)) => match outcome.as_mut() {
            Some(acc) => merge(acc, pushed),
            None => outcome = Some(pushed),
        },
        Ok(None) => {}
        Err(e) => {
            warn!("[Startup] {} push failed (non-fatal): {}", service, e);
            warnings.push(format!("{} push failed: {}", service, e));
        }
    }
    outcome
}

fn worth_reporting(result: &SyncResult) -> bool {
    !result.is_clean() || result.pulled > 0 || result.pushed > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{REMOTE_AUTO_SYNC, VAULT_AUTO_SYNC};
    use crate::sync::memory::{MemoryRemote, MemorySecretStore};
    use crate::workspace::{Collection, Environment, MemoryWorkspace, WorkspaceStore};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Notification>>);

    impl NotificationSink for RecordingSink {
        fn notify(&self, notification: &Notification) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(notification.clone());
            }
        }
    }

    fn settings(remote: bool, vault: bool) -> HashMap<String, bool> {
        let mut settings = HashMap::new();
        settings.insert(REMOTE_AUTO_SYNC.to_string(), remote);
        settings.insert(VAULT_AUTO_SYNC.to_string(), vault);
        settings
    }

    #[test]
    fn test_disabled_services_make_no_calls() {
        let remote = MemoryRemote::new();
        let secrets = MemorySecretStore::new();
        let store = Arc::new(MemoryWorkspace::new());
        let files = RemoteSyncService::new(Box::new(remote.clone()), store.clone(), "apisync");
        let envs = VaultSyncService::new(Box::new(secrets.clone()), store, "apisync");
        let sink = RecordingSink::default();

        let report = run_startup_sync(&settings(false, false), Some(&files), Some(&envs), &sink);
        assert!(report.remote.is_none());
        assert!(report.vault.is_none());
        assert_eq!(remote.call_count(), 0);
        assert_eq!(secrets.call_count(), 0);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unreachable_remote_becomes_warning() -> anyhow::Result<()> {
        let remote = MemoryRemote::new();
        remote.set_unavailable(true);
        let store = Arc::new(MemoryWorkspace::new());
        store.save_local_edit(&Collection::new("c1", "Users"))?;
        let files = RemoteSyncService::new(Box::new(remote), store, "apisync");
        let sink = RecordingSink::default();

        let report = run_startup_sync(&settings(true, false), Some(&files), None, &sink);
        assert!(report.remote.is_none());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].starts_with("Remote pull failed"));

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|n| n.level == Level::Warning));
        Ok(())
    }

    #[test]
    fn test_enabled_vault_runs_pull_and_push() -> anyhow::Result<()> {
        let secrets = MemorySecretStore::new();
        secrets.seed("apisync/prod", &[("HOST", "api.example.com")]);
        let store = Arc::new(MemoryWorkspace::new());
        store.upsert_environment(&Environment::new("dev").with_variable("HOST", "localhost"))?;
        let envs = VaultSyncService::new(Box::new(secrets.clone()), store, "apisync");

        let report = run_startup_sync(
            &settings(false, true),
            None,
            Some(&envs),
            &RecordingSink::default(),
        );
        let summary = report.vault.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.pushed, 2);
        assert!(secrets.secret("apisync/dev").is_some());
        Ok(())
    }
}
