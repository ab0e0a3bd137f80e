//! Config module - Manages apisync configuration (apisync.toml).
//!
//! Configuration file contains:
//! - Git remote settings (GitHub repository, branch, base path)
//! - Vault settings (address, KV mount, base path)
//! - Auto-sync toggles consulted on application start

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Setting key gating automatic file sync.
pub const REMOTE_AUTO_SYNC: &str = "remote.auto_sync";
/// Setting key gating automatic secret sync.
pub const VAULT_AUTO_SYNC: &str = "vault.auto_sync";

/// Read-only view of the application's boolean settings.
///
/// Injected into the sync services instead of reading global state.
pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str, default: bool) -> bool;
}

impl SettingsStore for HashMap<String, bool> {
    fn get_setting(&self, key: &str, default: bool) -> bool {
        self.get(key).copied().unwrap_or(default)
    }
}

/// Git remote configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Repository owner (user or organisation)
    #[serde(default)]
    pub owner: Option<String>,
    /// Repository name
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Folder inside the repository that holds the workspace
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_github_api")]
    pub api_base: String,
    /// Personal access token. Prefer the keyring or APISYNC_GITHUB_TOKEN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            owner: None,
            repo: None,
            branch: default_branch(),
            base_path: default_base_path(),
            api_base: default_github_api(),
            token: None,
        }
    }
}

/// Vault (KV v2) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Server address, e.g. https://vault.example.com:8200
    #[serde(default)]
    pub address: Option<String>,
    /// KV v2 mount point
    #[serde(default = "default_mount")]
    pub mount: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Enterprise namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Prefer the keyring or APISYNC_VAULT_TOKEN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: None,
            mount: default_mount(),
            base_path: default_base_path(),
            namespace: None,
            token: None,
        }
    }
}

/// Boolean toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default)]
    pub remote_auto_sync: bool,
    #[serde(default)]
    pub vault_auto_sync: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_base_path() -> String {
    "apisync".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_mount() -> String {
    "secret".to_string()
}

fn default_version() -> u32 {
    1
}

/// Main apisync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config version (for future migrations)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace database location
    #[serde(default = "default_workspace_db")]
    pub workspace_db: PathBuf,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub settings: SettingsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_db: default_workspace_db(),
            remote: RemoteConfig::default(),
            vault: VaultConfig::default(),
            settings: SettingsConfig::default(),
        }
    }
}

/// Get default workspace database path.
pub fn default_workspace_db() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("apisync").join("workspace.db"))
        .unwrap_or_else(|| PathBuf::from("./workspace.db"))
}

/// Get default config directory (~/.config/apisync/).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("apisync"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get default config file path.
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("apisync.toml")
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Cannot parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from `path`, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).with_context(|| "Cannot serialize config to TOML")?;

        std::fs::write(path, content)
            .with_context(|| format!("Cannot write config file: {}", path.display()))?;

        // The file may carry tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Whether a Git remote has been set up (token resolution happens later).
    pub fn has_remote(&self) -> bool {
        self.remote.owner.is_some() && self.remote.repo.is_some()
    }

    pub fn has_vault(&self) -> bool {
        self.vault.address.is_some()
    }
}

impl SettingsStore for Config {
    fn get_setting(&self, key: &str, default: bool) -> bool {
        match key {
            REMOTE_AUTO_SYNC => self.settings.remote_auto_sync,
            VAULT_AUTO_SYNC => self.settings.vault_auto_sync,
            _ => default,
        }
    }
}
