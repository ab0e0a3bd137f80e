//! Command implementations for the apisync CLI.
//!
//! Per-collection conflicts and errors are reported, not fatal. A command
//! only fails (non-zero exit) when the whole operation could not run.

use super::Backend;
use anyhow::{bail, Context, Result};
use apisync::config::Config;
use apisync::credentials::{self, github_token, vault_token};
use apisync::notify::{Level, Notification, NotificationSink};
use apisync::sync::layout::validate_id;
use apisync::sync::{
    run_startup_sync, GitHubProvider, HashiCorpVaultProvider, RemoteSyncService, SyncResult,
    VaultSyncService, VaultSyncSummary,
};
use apisync::workspace::{Collection, SqliteWorkspace, WorkspaceStore};
use colored::Colorize;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

/// Loaded config plus the open workspace.
struct Session {
    config: Config,
    store: Arc<SqliteWorkspace>,
}

impl Session {
    fn open(config_path: &Path) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        let store = Arc::new(SqliteWorkspace::open(&config.workspace_db)?);
        Ok(Self { config, store })
    }

    fn remote(&self) -> RemoteSyncService {
        let provider = GitHubProvider::from_config(&self.config.remote, github_token(&self.config));
        RemoteSyncService::new(
            Box::new(provider),
            self.store.clone(),
            self.config.remote.base_path.clone(),
        )
    }

    fn vault(&self) -> VaultSyncService {
        let provider =
            HashiCorpVaultProvider::from_config(&self.config.vault, vault_token(&self.config));
        VaultSyncService::new(
            Box::new(provider),
            self.store.clone(),
            self.config.vault.base_path.clone(),
        )
    }

    /// Record an action in the sync log. Logging failures never fail the command.
    fn log(&self, action: &str, details: &impl serde::Serialize) {
        let details = serde_json::to_string(details).ok();
        if let Err(e) = self.store.log_sync(action, details.as_deref()) {
            tracing::warn!("[CLI] Cannot write sync log: {}", e);
        }
    }
}

/// Prints notifications to the terminal.
struct TerminalSink;

impl NotificationSink for TerminalSink {
    fn notify(&self, n: &Notification) {
        let title = match n.level {
            Level::Info => n.title.green().bold(),
            Level::Warning => n.title.yellow().bold(),
            Level::Error => n.title.red().bold(),
        };
        println!("{}", title);
        for line in n.body.lines() {
            println!("  {}", line);
        }
    }
}

fn require_remote(service: &RemoteSyncService) -> Result<()> {
    if !service.is_configured() {
        bail!(
            "Git remote is not configured. Set [remote] owner/repo in the config and provide a token \
             ({} or `apisync login github`).",
            credentials::GITHUB_TOKEN_ENV
        );
    }
    Ok(())
}

fn require_vault(service: &VaultSyncService) -> Result<()> {
    if !service.is_configured() {
        bail!(
            "Vault is not configured. Set [vault] address in the config and provide a token \
             ({} or `apisync login vault`).",
            credentials::VAULT_TOKEN_ENV
        );
    }
    Ok(())
}

fn print_sync_result(result: &SyncResult) {
    TerminalSink.notify(&Notification::from_sync_result(result));
}

fn print_vault_summary(summary: &VaultSyncSummary) {
    TerminalSink.notify(&Notification::from_vault_summary(summary));
}

pub fn status(config_path: &Path) -> Result<()> {
    println!("{}", "apisync status".cyan().bold());
    println!("Config: {}", config_path.display().to_string().dimmed());

    let session = Session::open(config_path)?;
    println!(
        "Workspace: {}",
        session.config.workspace_db.display().to_string().dimmed()
    );
    println!();

    let remote = session.remote();
    let remote_cfg = &session.config.remote;
    if remote.is_configured() {
        let target = format!(
            "{}/{}@{}",
            remote_cfg.owner.as_deref().unwrap_or_default(),
            remote_cfg.repo.as_deref().unwrap_or_default(),
            remote_cfg.branch
        );
        let state = if remote.test_connection() {
            "reachable".green()
        } else {
            "unreachable".red()
        };
        println!("  Git remote: {} [{}]", target.white().bold(), state);
    } else {
        println!("  Git remote: {}", "not configured".yellow());
    }

    let vault = session.vault();
    if vault.is_configured() {
        let address = session.config.vault.address.as_deref().unwrap_or_default();
        let state = if vault.test_connection() {
            "reachable".green()
        } else {
            "unreachable".red()
        };
        println!("  Vault:      {} [{}]", address.white().bold(), state);
    } else {
        println!("  Vault:      {}", "not configured".yellow());
    }

    let settings = &session.config.settings;
    println!(
        "  Auto-sync:  remote={}, vault={}",
        settings.remote_auto_sync, settings.vault_auto_sync
    );

    let recent = session.store.recent_sync_log(5)?;
    if !recent.is_empty() {
        println!("\n{}", "Recent activity".bold());
        for (at, action, _) in recent {
            println!(
                "  {} {}",
                at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                action
            );
        }
    }
    Ok(())
}

pub fn pull(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let remote = session.remote();
    require_remote(&remote)?;

    println!("{}", "Pulling collections...".cyan());
    let result = remote.pull().context("Pull failed")?;
    session.log("pull", &result);
    print_sync_result(&result);
    Ok(())
}

pub fn push(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let remote = session.remote();
    require_remote(&remote)?;

    println!("{}", "Pushing collections...".cyan());
    let result = remote.push().context("Push failed")?;
    session.log("push", &result);
    print_sync_result(&result);
    Ok(())
}

pub fn sync(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let remote = session.remote();
    require_remote(&remote)?;

    println!("{}", "Syncing collections...".cyan());
    let result = remote.sync().context("Sync failed")?;
    session.log("sync", &result);
    print_sync_result(&result);
    Ok(())
}

pub fn vault_pull(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let vault = session.vault();
    require_vault(&vault)?;

    println!("{}", "Pulling environments...".cyan());
    let summary = vault.pull_all().context("Vault pull failed")?;
    session.log("vault_pull", &summary);
    print_vault_summary(&summary);
    Ok(())
}

pub fn vault_push(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let vault = session.vault();
    require_vault(&vault)?;

    println!("{}", "Pushing environments...".cyan());
    let summary = vault.push_all().context("Vault push failed")?;
    session.log("vault_push", &summary);
    print_vault_summary(&summary);
    Ok(())
}

pub fn startup(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;
    let remote = session.remote();
    let vault = session.vault();

    let report = run_startup_sync(&session.config, Some(&remote), Some(&vault), &TerminalSink);
    if report.remote.is_none() && report.vault.is_none() && report.warnings.is_empty() {
        println!("{}", "Auto-sync is off or nothing is configured.".dimmed());
    }
    if let Some(result) = &report.remote {
        session.log("startup_remote", result);
    }
    if let Some(summary) = &report.vault {
        session.log("startup_vault", summary);
    }
    Ok(())
}

pub fn import(config_path: &Path, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Cannot read {}", file.display()))?;
    let collection = parse_collection(&content)
        .with_context(|| format!("Invalid collection file: {}", file.display()))?;

    let session = Session::open(config_path)?;
    session.store.save_local_edit(&collection)?;
    println!(
        "  {} Imported {} ({} request(s)), pending push",
        "✓".green(),
        collection.name.white().bold(),
        collection.requests.len()
    );
    Ok(())
}

/// Parse a collection file, generating an id when the file has none.
/// Ids must be usable as remote path segments.
fn parse_collection(content: &str) -> Result<Collection> {
    let mut value: serde_json::Value = serde_json::from_str(content)?;
    let Some(object) = value.as_object_mut() else {
        bail!("expected a JSON object");
    };
    let has_id = object
        .get("id")
        .and_then(|v| v.as_str())
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        object.insert(
            "id".to_string(),
            serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }

    let collection: Collection = serde_json::from_value(value)?;
    validate_id("collection", &collection.id)?;
    for request in &collection.requests {
        validate_id("request", &request.id)?;
    }
    Ok(collection)
}

pub fn list(config_path: &Path) -> Result<()> {
    let session = Session::open(config_path)?;

    let collections = session.store.list_collections()?;
    println!(
        "{} ({})",
        "Collections".cyan().bold(),
        collections.len()
    );
    for record in &collections {
        let marker = if record.sync.locally_modified {
            "modified".yellow()
        } else if record.sync.has_synced() {
            "synced".green()
        } else {
            "local".dimmed()
        };
        println!(
            "  {} [{}] {}",
            record.collection.name.white().bold(),
            marker,
            record.collection.id.dimmed()
        );
    }

    let environments = session.store.list_environments()?;
    println!(
        "\n{} ({})",
        "Environments".cyan().bold(),
        environments.len()
    );
    for env in &environments {
        println!(
            "  {} {}",
            env.name.white().bold(),
            format!("{} variable(s)", env.variables.len()).dimmed()
        );
    }
    Ok(())
}

pub fn login(backend: Backend) -> Result<()> {
    let (user, label) = match backend {
        Backend::Github => ("github_token", "GitHub"),
        Backend::Vault => ("vault_token", "Vault"),
    };
    print!("{} token: ", label);
    io::stdout().flush()?;

    // Input is not echoed
    let token = rpassword::read_password().context("Cannot read token")?;
    let token = token.trim();
    if token.is_empty() {
        bail!("Token cannot be empty");
    }

    credentials::save_token(user, token).context("Cannot store token in the OS keyring")?;
    println!("  {} Saved {} token to the keyring", "✓".green(), label);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collection_generates_id() -> Result<()> {
        let collection = parse_collection(r#"{"name": "Users", "requests": []}"#)?;
        assert_eq!(collection.name, "Users");
        assert!(!collection.id.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_collection_keeps_id() -> Result<()> {
        let collection = parse_collection(
            r#"{"id": "users", "name": "Users",
                "requests": [{"id": "r1", "name": "List", "url": "https://api.test/users"}]}"#,
        )?;
        assert_eq!(collection.id, "users");
        assert_eq!(collection.requests[0].method, "GET");
        Ok(())
    }

    #[test]
    fn test_parse_collection_rejects_bad_input() {
        assert!(parse_collection("[]").is_err());
        assert!(parse_collection(r#"{"id": "a/b", "name": "x"}"#).is_err());
    }

    #[test]
    fn test_parse_collection_rejects_path_like_request_ids() {
        for id in ["v1/users", "..", "../escape"] {
            let content = format!(
                r#"{{"id": "users", "name": "Users",
                    "requests": [{{"id": "{}", "name": "List", "url": "https://api.test/users"}}]}}"#,
                id
            );
            let err = parse_collection(&content).unwrap_err();
            assert!(err.to_string().contains("request id"), "{}: {}", id, err);
        }
    }
}
