//! Credentials - Resolve access tokens for the remote backends.
//!
//! Lookup order: explicit config value, environment variable, OS keyring.

use crate::config::Config;
use tracing::debug;

/// Keyring service name shared by all apisync tokens.
pub const KEYRING_SERVICE: &str = "apisync";

pub const GITHUB_TOKEN_ENV: &str = "APISYNC_GITHUB_TOKEN";
pub const VAULT_TOKEN_ENV: &str = "APISYNC_VAULT_TOKEN";

/// Find a token, or `None` when the backend has no credentials.
pub fn resolve_token(configured: Option<&str>, env_var: &str, keyring_user: &str) -> Option<String> {
    resolve_with(
        configured,
        std::env::var(env_var).ok(),
        || read_keyring(keyring_user),
    )
}

pub fn github_token(config: &Config) -> Option<String> {
    resolve_token(config.remote.token.as_deref(), GITHUB_TOKEN_ENV, "github_token")
}

pub fn vault_token(config: &Config) -> Option<String> {
    resolve_token(config.vault.token.as_deref(), VAULT_TOKEN_ENV, "vault_token")
}

/// Store a token in the OS keyring.
pub fn save_token(keyring_user: &str, token: &str) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, keyring_user)?;
    entry.set_password(token)?;
    Ok(())
}

fn resolve_with(
    configured: Option<&str>,
    env_value: Option<String>,
    keyring: impl FnOnce() -> Option<String>,
) -> Option<String> {
    let non_empty = |s: &String| !s.trim().is_empty();

    configured
        .map(str::to_string)
        .filter(non_empty)
        .or_else(|| env_value.filter(non_empty))
        .or_else(|| keyring().filter(non_empty))
}

fn read_keyring(user: &str) -> Option<String> {
    match keyring::Entry::new(KEYRING_SERVICE, user).and_then(|entry| entry.get_password()) {
        Ok(token) => Some(token),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            // Headless boxes and WSL often have no secret service
            debug!("[Credentials] Keyring unavailable for {}: {}", user, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_value_wins() {
        let token = resolve_with(Some("from-config"), Some("from-env".into()), || {
            Some("from-keyring".into())
        });
        assert_eq!(token.as_deref(), Some("from-config"));
    }

    #[test]
    fn test_env_before_keyring() {
        let token = resolve_with(None, Some("from-env".into()), || Some("from-keyring".into()));
        assert_eq!(token.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let token = resolve_with(Some("  "), Some(String::new()), || Some("from-keyring".into()));
        assert_eq!(token.as_deref(), Some("from-keyring"));
        assert!(resolve_with(None, None, || None).is_none());
    }

    #[test]
    fn test_resolve_reads_environment() {
        let var = "APISYNC_TEST_TOKEN_RESOLVE";
        std::env::set_var(var, "env-token");
        let token = resolve_token(None, var, "apisync_test_missing_user");
        std::env::remove_var(var);
        assert_eq!(token.as_deref(), Some("env-token"));
    }
}
